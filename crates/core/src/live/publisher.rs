use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::err::Error;

/// Delivers live query messages to the clients listening on a channel.
#[async_trait]
pub trait Publisher: Send + Sync {
	/// Publishes a message batch on a channel
	async fn publish(&self, channel: &str, message: Value) -> Result<(), Error>;

	/// Routes a channel to a client connection before the first message
	/// is published on it
	async fn attach(&self, _client_id: Uuid, _channel: &str) -> Result<(), Error> {
		Ok(())
	}

	/// Forgets a channel which will not be published on again
	async fn release(&self, _channel: &str) -> Result<(), Error> {
		Ok(())
	}
}
