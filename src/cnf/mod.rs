use std::sync::LazyLock;
use std::time::Duration;

use livesync_core::lazy_env_parse;

/// The publicly visible name of the server
pub const PKG_NAME: &str = "livesync";

/// The version identifier of this build
pub static PKG_VERSION: LazyLock<String> =
	LazyLock::new(|| match option_env!("LIVESYNC_BUILD_METADATA") {
		Some(metadata) if !metadata.trim().is_empty() => {
			let version = env!("CARGO_PKG_VERSION");
			format!("{version}+{metadata}")
		}
		_ => env!("CARGO_PKG_VERSION").to_owned(),
	});

/// The path every route is nested under
pub const API_PREFIX: &str = "/api";

/// The environment variable which overrides the log filter
pub const LOG_ENV: &str = "LIVESYNC_LOG";

/// Specifies the frequency with which ping messages are sent to websocket clients
pub const WEBSOCKET_PING_FREQUENCY: Duration = Duration::from_secs(5);

/// The maximum size of a request body (defaults to 4 MiB)
pub static HTTP_MAX_BODY_SIZE: LazyLock<usize> =
	lazy_env_parse!("LIVESYNC_HTTP_MAX_BODY_SIZE", usize, 4 << 20);
