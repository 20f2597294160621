use std::sync::LazyLock;

/// How long a stored live query may go without a keep-alive before it is
/// considered stale and eligible for removal (defaults to 5 minutes)
pub static LIVE_QUERY_STALE_TIMEOUT_SECS: LazyLock<u64> =
	lazy_env_parse!("LIVESYNC_LIVE_QUERY_STALE_TIMEOUT_SECS", u64, 300);

/// How often the background task purges stale live queries (defaults to 60 seconds)
pub static LIVE_QUERY_GC_INTERVAL_SECS: LazyLock<u64> =
	lazy_env_parse!("LIVESYNC_LIVE_QUERY_GC_INTERVAL_SECS", u64, 60);

/// How many times a live query diff is recomputed after losing a
/// concurrent write to the same stored query (defaults to 5)
pub static LIVE_QUERY_MAX_RETRIES: LazyLock<usize> =
	lazy_env_parse!("LIVESYNC_LIVE_QUERY_MAX_RETRIES", usize, 5);

/// How often a keep-alive event is sent on every open stream (defaults to 30 seconds)
pub static STREAM_KEEP_ALIVE_SECS: LazyLock<u64> =
	lazy_env_parse!("LIVESYNC_STREAM_KEEP_ALIVE_SECS", u64, 30);

/// How many envelopes may be queued for a single client connection (defaults to 1024)
pub static CONNECTION_CHANNEL_SIZE: LazyLock<usize> =
	lazy_env_parse!("LIVESYNC_CONNECTION_CHANNEL_SIZE", usize, 1024);
