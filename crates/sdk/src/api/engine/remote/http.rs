//! The HTTP requests which register, keep alive and end live queries.

use async_trait::async_trait;
use livesync_core::expr::FindOptions;
use livesync_core::proto::{
	ACTION_PARAM, CLIENT_ID_HEADER, END_LIVE_QUERY_ACTION, EndLiveQuery, KEEP_ALIVE_ROUTE,
	LIVE_QUERY_ACTION, SubscribeResponse,
};
use uuid::Uuid;

use super::send;
use crate::Result;
use crate::api::opt::ClientConfig;

/// The live query requests a client makes.
#[async_trait]
pub trait ApiClient: Send + Sync {
	/// Runs a query and registers it as a live query
	async fn live_query(&self, entity_key: &str, options: &FindOptions) -> Result<SubscribeResponse>;

	/// Tells the server a live query is no longer needed
	async fn end_live_query(&self, entity_key: &str, id: &str) -> Result<()>;

	/// Keeps live queries alive, returning the ids the server does not know
	async fn keep_alive(&self, ids: &[String]) -> Result<Vec<String>>;
}

/// An [`ApiClient`] over HTTP.
///
/// Queries are sent as a GET with the options in the query string when
/// the filter fits in a URL, and as a POST with a JSON body otherwise.
#[derive(Clone, Debug)]
pub struct HttpApi {
	http: reqwest::Client,
	config: ClientConfig,
	client_id: Uuid,
}

impl HttpApi {
	pub fn new(http: reqwest::Client, config: ClientConfig, client_id: Uuid) -> Self {
		Self {
			http,
			config,
			client_id,
		}
	}

	fn query_params(options: &FindOptions) -> Result<Vec<(&'static str, String)>> {
		let mut params = vec![(ACTION_PARAM, LIVE_QUERY_ACTION.to_owned())];
		if !options.filter.is_empty() {
			params.push(("where", serde_json::to_string(&options.filter)?));
		}
		if !options.order_by.is_empty() {
			params.push(("orderBy", serde_json::to_string(&options.order_by)?));
		}
		if let Some(limit) = options.limit {
			params.push(("limit", limit.to_string()));
		}
		if let Some(page) = options.page {
			params.push(("page", page.to_string()));
		}
		if let Some(load) = &options.load {
			params.push(("load", serde_json::to_string(load)?));
		}
		Ok(params)
	}
}

#[async_trait]
impl ApiClient for HttpApi {
	async fn live_query(&self, entity_key: &str, options: &FindOptions) -> Result<SubscribeResponse> {
		let url = self.config.api_url(entity_key)?;
		let request = if options.filter.fits_in_url() {
			trace!("Registering live query on {entity_key} with GET");
			self.http.get(url).query(&Self::query_params(options)?)
		} else {
			trace!("Registering live query on {entity_key} with POST");
			self.http.post(url).query(&[(ACTION_PARAM, LIVE_QUERY_ACTION)]).json(&options.to_json())
		};
		let response = send(request.header(CLIENT_ID_HEADER, self.client_id.to_string())).await?;
		Ok(response.json().await?)
	}

	async fn end_live_query(&self, entity_key: &str, id: &str) -> Result<()> {
		trace!("Ending live query {id}");
		let url = self.config.api_url(entity_key)?;
		let request = self
			.http
			.post(url)
			.query(&[(ACTION_PARAM, END_LIVE_QUERY_ACTION)])
			.header(CLIENT_ID_HEADER, self.client_id.to_string())
			.json(&EndLiveQuery {
				id: id.to_owned(),
			});
		send(request).await?;
		Ok(())
	}

	async fn keep_alive(&self, ids: &[String]) -> Result<Vec<String>> {
		let url = self.config.api_url(KEEP_ALIVE_ROUTE)?;
		let request =
			self.http.post(url).header(CLIENT_ID_HEADER, self.client_id.to_string()).json(ids);
		Ok(send(request).await?.json().await?)
	}
}

#[cfg(test)]
mod tests {
	use livesync_core::expr::{Filter, OrderBy};
	use serde_json::json;
	use wiremock::matchers::{body_json, header, method, path, query_param, query_param_is_missing};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	use super::*;
	use crate::api::err::Error;

	async fn api(server: &MockServer) -> (HttpApi, Uuid) {
		let config = ClientConfig::new(&format!("{}/api", server.uri())).unwrap();
		let client_id = Uuid::new_v4();
		(HttpApi::new(reqwest::Client::new(), config, client_id), client_id)
	}

	#[test_log::test(tokio::test)]
	async fn simple_filters_use_get() {
		let server = MockServer::start().await;
		let (api, client_id) = api(&server).await;
		Mock::given(method("GET"))
			.and(path("/api/tasks"))
			.and(query_param("__action", "liveQuery"))
			.and(query_param("where", r#"{"title":{"$contains":"a"}}"#))
			.and(query_param("orderBy", r#"{"title":"desc"}"#))
			.and(query_param("limit", "5"))
			.and(query_param_is_missing("page"))
			.and(header("client-id", client_id.to_string().as_str()))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"result": [{"id": 1, "title": "a"}],
				"queryChannel": "live:tasks:1",
			})))
			.expect(1)
			.mount(&server)
			.await;
		let options = FindOptions::new()
			.with_filter(Filter::contains("title", "a"))
			.with_order_by(OrderBy::default().desc("title"))
			.with_limit(5);
		let res = api.live_query("tasks", &options).await.unwrap();
		assert_eq!(res.query_channel, "live:tasks:1");
		assert_eq!(res.result.len(), 1);
	}

	#[test_log::test(tokio::test)]
	async fn complex_filters_use_post() {
		let server = MockServer::start().await;
		let (api, _) = api(&server).await;
		let filter = json!({"$or": [{"title": "a"}, {"title": "b"}]});
		Mock::given(method("POST"))
			.and(path("/api/tasks"))
			.and(query_param("__action", "liveQuery"))
			.and(body_json(json!({"where": filter})))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!({
				"result": [],
				"queryChannel": "live:tasks:2",
			})))
			.expect(1)
			.mount(&server)
			.await;
		let options = FindOptions::new().with_filter(Filter::from_json(filter).unwrap());
		let res = api.live_query("tasks", &options).await.unwrap();
		assert_eq!(res.query_channel, "live:tasks:2");
	}

	#[test_log::test(tokio::test)]
	async fn end_and_keep_alive() {
		let server = MockServer::start().await;
		let (api, _) = api(&server).await;
		Mock::given(method("POST"))
			.and(path("/api/tasks"))
			.and(query_param("__action", "endLiveQuery"))
			.and(body_json(json!({"id": "live:tasks:1"})))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/api/_liveQueryKeepAlive"))
			.and(body_json(json!(["a", "b"])))
			.respond_with(ResponseTemplate::new(200).set_body_json(json!(["b"])))
			.expect(1)
			.mount(&server)
			.await;
		api.end_live_query("tasks", "live:tasks:1").await.unwrap();
		let unknown = api.keep_alive(&["a".to_owned(), "b".to_owned()]).await.unwrap();
		assert_eq!(unknown, vec!["b".to_owned()]);
	}

	#[test_log::test(tokio::test)]
	async fn errors_carry_the_status() {
		let server = MockServer::start().await;
		let (api, _) = api(&server).await;
		Mock::given(method("GET"))
			.and(path("/api/nope"))
			.respond_with(ResponseTemplate::new(404).set_body_string("The entity 'nope' does not exist"))
			.mount(&server)
			.await;
		match api.live_query("nope", &FindOptions::default()).await {
			Err(Error::Api {
				status,
				message,
			}) => {
				assert_eq!(status, 404);
				assert!(message.contains("nope"));
			}
			other => panic!("unexpected result: {other:?}"),
		}
	}
}
