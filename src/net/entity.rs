use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use http::StatusCode;
use livesync_core::expr::FindOptions;
use livesync_core::proto::{EndLiveQuery, END_LIVE_QUERY_ACTION, KEEP_ALIVE_ROUTE, LIVE_QUERY_ACTION};
use livesync_core::val::{Id, Row};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::AppState;
use super::extract::{ClientId, RequestSession};
use crate::err::Error;

/// The query string of an entity request
#[derive(Default, Deserialize, Debug, Clone)]
struct Params {
	#[serde(rename = "__action")]
	action: Option<String>,
	#[serde(rename = "where")]
	filter: Option<String>,
	#[serde(rename = "orderBy")]
	order_by: Option<String>,
	limit: Option<String>,
	page: Option<String>,
	load: Option<String>,
}

impl Params {
	/// The find options carried in the query string, in their JSON form
	fn options(&self) -> Result<Value, Error> {
		let mut options = Map::new();
		if let Some(v) = &self.filter {
			options.insert("where".to_owned(), parse_json("where", v)?);
		}
		if let Some(v) = &self.order_by {
			options.insert("orderBy".to_owned(), parse_json("orderBy", v)?);
		}
		if let Some(v) = &self.limit {
			options.insert("limit".to_owned(), parse_number("limit", v)?.into());
		}
		if let Some(v) = &self.page {
			options.insert("page".to_owned(), parse_number("page", v)?.into());
		}
		if let Some(v) = &self.load {
			options.insert("load".to_owned(), parse_json("load", v)?);
		}
		Ok(Value::Object(options))
	}
}

fn parse_json(name: &str, v: &str) -> Result<Value, Error> {
	serde_json::from_str(v).map_err(|e| Error::Request(format!("'{name}' is not valid JSON: {e}")))
}

fn parse_number(name: &str, v: &str) -> Result<u64, Error> {
	v.trim().parse().map_err(|_| Error::Request(format!("'{name}' is not a positive number")))
}

/// Reads an optional JSON request body
fn parse_body(body: &Bytes) -> Result<Value, Error> {
	if body.iter().all(u8::is_ascii_whitespace) {
		return Ok(Value::Null);
	}
	Ok(serde_json::from_slice(body)?)
}

fn parse_row(body: &Bytes) -> Result<Row, Error> {
	match parse_body(body)? {
		Value::Object(row) => Ok(row),
		v => Err(Error::Request(format!("expected an object but found {v}"))),
	}
}

/// Ids in a path are numbers when they look like one
fn path_id(raw: &str) -> Id {
	match raw.parse::<i64>() {
		Ok(n) => Id::from(n),
		Err(_) => Id::from(raw),
	}
}

pub(super) fn router() -> Router<AppState> {
	Router::new()
		.route(&format!("/{KEEP_ALIVE_ROUTE}"), post(keep_alive))
		.route("/{entity}", get(get_entity).post(post_entity))
		.route("/{entity}/{id}", put(update_row).delete(delete_row))
}

async fn subscribe(
	state: &AppState,
	entity: &str,
	options: Value,
	client_id: ClientId,
	session: &livesync_core::dbs::Session,
) -> Result<Response, Error> {
	let response = state.datastore.live().subscribe(entity, options, session, client_id.0).await?;
	Ok(Json(response).into_response())
}

async fn get_entity(
	State(state): State<AppState>,
	Path(entity): Path<String>,
	Query(params): Query<Params>,
	client_id: ClientId,
	RequestSession(session): RequestSession,
) -> Result<Response, Error> {
	let options = params.options()?;
	match params.action.as_deref() {
		None => {
			let options = FindOptions::from_json(options)?;
			let rows = state.datastore.find(&entity, &options, &session).await?;
			Ok(Json(rows).into_response())
		}
		Some(LIVE_QUERY_ACTION) => subscribe(&state, &entity, options, client_id, &session).await,
		Some(action) => Err(Error::UnsupportedAction(action.to_owned())),
	}
}

async fn post_entity(
	State(state): State<AppState>,
	Path(entity): Path<String>,
	Query(params): Query<Params>,
	client_id: ClientId,
	RequestSession(session): RequestSession,
	body: Bytes,
) -> Result<Response, Error> {
	match params.action.as_deref() {
		None => {
			let change = state.datastore.insert(&entity, parse_row(&body)?, &session).await?;
			Ok((StatusCode::CREATED, Json(change)).into_response())
		}
		Some(LIVE_QUERY_ACTION) => {
			let options = parse_body(&body)?;
			subscribe(&state, &entity, options, client_id, &session).await
		}
		Some(END_LIVE_QUERY_ACTION) => {
			let EndLiveQuery {
				id,
			} = serde_json::from_slice(&body)?;
			state.datastore.live().end_live_query(&id).await?;
			Ok(StatusCode::OK.into_response())
		}
		Some(action) => Err(Error::UnsupportedAction(action.to_owned())),
	}
}

async fn update_row(
	State(state): State<AppState>,
	Path((entity, id)): Path<(String, String)>,
	RequestSession(session): RequestSession,
	body: Bytes,
) -> Result<Response, Error> {
	let change = state.datastore.update(&entity, &path_id(&id), parse_row(&body)?, &session).await?;
	Ok(Json(change).into_response())
}

async fn delete_row(
	State(state): State<AppState>,
	Path((entity, id)): Path<(String, String)>,
	RequestSession(session): RequestSession,
) -> Result<Response, Error> {
	let change = state.datastore.delete(&entity, &path_id(&id), &session).await?;
	Ok(Json(change).into_response())
}

async fn keep_alive(
	State(state): State<AppState>,
	Json(ids): Json<Vec<String>>,
) -> Result<Json<Vec<String>>, Error> {
	Ok(Json(state.datastore.live().keep_alive(&ids).await?))
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn query_string_becomes_find_options() {
		let params = Params {
			filter: Some(r#"{"title":{"$contains":"a"}}"#.to_owned()),
			order_by: Some(r#"{"title":"desc"}"#.to_owned()),
			limit: Some("10".to_owned()),
			page: Some("2".to_owned()),
			..Default::default()
		};
		assert_eq!(
			params.options().unwrap(),
			json!({
				"where": {"title": {"$contains": "a"}},
				"orderBy": {"title": "desc"},
				"limit": 10,
				"page": 2,
			})
		);
		let params = Params {
			limit: Some("ten".to_owned()),
			..Default::default()
		};
		assert!(params.options().is_err());
	}

	#[test]
	fn parses_bodies_and_ids() {
		assert_eq!(parse_body(&Bytes::from_static(b"  ")).unwrap(), Value::Null);
		assert!(parse_row(&Bytes::from_static(b"[1]")).is_err());
		assert_eq!(path_id("5"), Id::from(5));
		assert_eq!(path_id("a5"), Id::from("a5"));
	}
}
