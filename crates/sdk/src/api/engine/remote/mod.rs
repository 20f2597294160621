//! Remote engines, talking to the server over the network.

pub mod http;
pub mod sse;
pub mod ws;

use reqwest::{RequestBuilder, Response};

use crate::Result;
use crate::api::err::Error;

/// Turns a non-success response into an API error
pub(crate) async fn check(response: Response) -> Result<Response> {
	let status = response.status();
	if status.is_success() {
		return Ok(response);
	}
	let message = response.text().await.unwrap_or_default();
	Err(Error::Api {
		status: status.as_u16(),
		message,
	})
}

/// Sends a request and checks its status
pub(crate) async fn send(request: RequestBuilder) -> Result<Response> {
	check(request.send().await?).await
}
