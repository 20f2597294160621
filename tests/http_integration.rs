mod common;

use common::start_server;
use livesync_server::dbs::StorageKind;
use serde_json::{Value, json};

#[test_log::test(tokio::test)]
async fn rows_can_be_written_and_found() {
	let server = start_server(StorageKind::Memory).await;
	let http = reqwest::Client::new();
	let res = http.post(server.url("tasks")).json(&json!({"id": 3, "title": "a2"})).send().await.unwrap();
	assert_eq!(res.status(), 201);
	let res = http.put(server.url("tasks/3")).json(&json!({"title": "c2"})).send().await.unwrap();
	assert_eq!(res.status(), 200);
	let rows: Vec<Value> = http
		.get(server.url("tasks"))
		.query(&[("where", r#"{"title":{"$contains":"2"}}"#)])
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(rows, vec![json!({"id": 3, "title": "c2"})]);
	let res = http.delete(server.url("tasks/3")).send().await.unwrap();
	assert_eq!(res.status(), 200);
	let rows: Vec<Value> = http.get(server.url("tasks")).send().await.unwrap().json().await.unwrap();
	assert_eq!(rows.len(), 2);
}

#[test_log::test(tokio::test)]
async fn errors_are_mapped_to_status_codes() {
	let server = start_server(StorageKind::Memory).await;
	let http = reqwest::Client::new();
	let res = http.get(server.url("notes")).send().await.unwrap();
	assert_eq!(res.status(), 404);
	let res = http.get(server.url("tasks")).query(&[("__action", "explain")]).send().await.unwrap();
	assert_eq!(res.status(), 400);
	let res = http.get(server.url("tasks")).query(&[("limit", "many")]).send().await.unwrap();
	assert_eq!(res.status(), 400);
	let res = http.post(server.url("tasks")).json(&json!({"id": 1, "title": "again"})).send().await.unwrap();
	assert_eq!(res.status(), 409);
	let res = http.delete(server.url("tasks/99")).send().await.unwrap();
	assert_eq!(res.status(), 404);
	let res = http
		.post(server.url("stream/subscribe"))
		.json(&json!({"channel": "live:tasks:1"}))
		.send()
		.await
		.unwrap();
	assert_eq!(res.status(), 400);
	let res = http
		.get(server.url("stream"))
		.header("client-id", "not-a-uuid")
		.send()
		.await
		.unwrap();
	assert_eq!(res.status(), 400);
}
