mod common;

use std::sync::Arc;

use common::{RECEIVE_TIMEOUT, SILENCE_TIMEOUT, start_server};
use futures::StreamExt;
use livesync::opt::{ClientConfig, TransportKind};
use livesync::{Filter, FindOptions, JsonEntity, LiveClient, LiveQueryChange, LiveStream};
use livesync_server::dbs::StorageKind;
use serde_json::json;
use tokio::time::timeout;

fn titles(info: &livesync::LiveQueryChangeInfo) -> Vec<String> {
	info.items.iter().filter_map(|r| r.get("title")?.as_str().map(str::to_owned)).collect()
}

async fn next(stream: &mut LiveStream) -> livesync::LiveQueryChangeInfo {
	timeout(RECEIVE_TIMEOUT, stream.next())
		.await
		.expect("no update arrived in time")
		.expect("the stream ended")
		.expect("the query failed")
}

async fn only_matching_queries_are_notified(transport: TransportKind, storage: StorageKind) {
	let server = start_server(storage).await;
	let config = ClientConfig::new(&server.api_url()).unwrap().with_transport(transport);
	let client = LiveClient::new(config).unwrap();
	let tasks = Arc::new(JsonEntity::new("tasks"));
	let mut a = client.stream(tasks.clone(), FindOptions::new().with_filter(Filter::contains("title", "a")));
	let mut b = client.stream(tasks, FindOptions::new().with_filter(Filter::contains("title", "b")));
	assert_eq!(titles(&next(&mut a).await), vec!["a1"]);
	assert_eq!(titles(&next(&mut b).await), vec!["b1"]);
	client.flush().await;
	// Write a row which only matches the first query
	server.insert("tasks", json!({"id": 5, "title": "a3"})).await;
	let info = next(&mut a).await;
	assert_eq!(info.changes.len(), 1);
	assert!(matches!(&info.changes[0], LiveQueryChange::Add(row) if row["title"] == "a3"));
	assert_eq!(titles(&info), vec!["a1", "a3"]);
	assert!(timeout(SILENCE_TIMEOUT, b.next()).await.is_err());
	drop(a);
	drop(b);
	client.close().await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn event_stream_notifies_matching_queries() {
	only_matching_queries_are_notified(TransportKind::Sse, StorageKind::Memory).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn websocket_notifies_matching_queries() {
	only_matching_queries_are_notified(TransportKind::Ws, StorageKind::Memory).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn entity_storage_notifies_matching_queries() {
	only_matching_queries_are_notified(TransportKind::Sse, StorageKind::Entity).await;
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn ending_a_query_removes_it() {
	let server = start_server(StorageKind::Memory).await;
	let http = reqwest::Client::new();
	let response: serde_json::Value = http
		.post(format!("{}?__action=liveQuery", server.url("tasks")))
		.json(&json!({"where": {"title": {"$contains": "a"}}}))
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	let id = response["queryChannel"].as_str().unwrap().to_owned();
	assert_eq!(response["result"].as_array().unwrap().len(), 1);
	let unknown: Vec<String> = http
		.post(server.url("_liveQueryKeepAlive"))
		.json(&json!([id, "live:tasks:gone"]))
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(unknown, vec!["live:tasks:gone".to_owned()]);
	let status = http
		.post(format!("{}?__action=endLiveQuery", server.url("tasks")))
		.json(&json!({"id": id}))
		.send()
		.await
		.unwrap()
		.status();
	assert_eq!(status, 200);
	let unknown: Vec<String> = http
		.post(server.url("_liveQueryKeepAlive"))
		.json(&json!([id]))
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(unknown, vec![id]);
}
