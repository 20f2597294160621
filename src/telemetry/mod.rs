use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cnf::LOG_ENV;
use crate::err::Error;

/// The crates whose events are shown at the requested log level
const TARGETS: [&str; 3] = ["livesync", "livesync_core", "livesync_server"];

#[derive(Default, Debug)]
pub struct Builder {
	log_level: Option<String>,
	filter: Option<EnvFilter>,
}

pub fn builder() -> Builder {
	Builder::default()
}

/// Parses a log level or a full filter directive.
///
/// A plain level applies to the livesync crates only, with every other
/// crate logging errors.
pub fn filter_from_value(v: &str) -> Result<EnvFilter, ParseError> {
	match v {
		// Don't show any logs at all
		"none" => EnvFilter::builder().parse("off"),
		// Show all logs from every crate
		"full" => EnvFilter::builder().parse("trace"),
		// Otherwise, only show logs from livesync
		"error" | "warn" | "info" | "debug" | "trace" => {
			let directives: Vec<String> = TARGETS.iter().map(|t| format!("{t}={v}")).collect();
			EnvFilter::builder().parse(format!("error,{}", directives.join(",")))
		}
		// Let's try to parse the custom directive
		_ => EnvFilter::builder().parse(v),
	}
}

impl Builder {
	/// Set the log level on the builder
	pub fn with_log_level(mut self, log_level: &str) -> Self {
		self.log_level = Some(log_level.to_owned());
		self
	}

	/// Set the filter on the builder
	pub fn with_filter(mut self, filter: EnvFilter) -> Self {
		self.filter = Some(filter);
		self
	}

	/// The filter in use, with the environment taking precedence over
	/// the log level
	fn filter(self) -> Result<EnvFilter, Error> {
		if let Some(filter) = self.filter {
			return Ok(filter);
		}
		let value = match std::env::var(LOG_ENV) {
			Ok(value) if !value.trim().is_empty() => value,
			_ => self.log_level.unwrap_or_else(|| "info".to_owned()),
		};
		filter_from_value(&value).map_err(|e| Error::Telemetry(e.to_string()))
	}

	/// Build a tracing dispatcher with a compact fmt layer writing to stderr
	pub fn build(self) -> Result<Box<dyn Subscriber + Send + Sync + 'static>, Error> {
		let filter = self.filter()?;
		let layer = tracing_subscriber::fmt::layer()
			.compact()
			.with_ansi(true)
			.with_target(true)
			.with_span_events(FmtSpan::NONE)
			.with_writer(std::io::stderr)
			.with_filter(filter);
		Ok(Box::new(tracing_subscriber::registry().with(layer)))
	}

	/// Build a dispatcher and set it as global
	pub fn init(self) -> Result<(), Error> {
		self.build()?.try_init().map_err(|e| Error::Telemetry(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn levels_apply_to_livesync_crates() {
		let filter = filter_from_value("debug").unwrap().to_string();
		assert!(filter.contains("livesync_core=debug"));
		assert!(filter.contains("livesync_server=debug"));
	}

	#[test]
	fn custom_directives_are_kept() {
		let filter = filter_from_value("livesync_core::live=trace").unwrap().to_string();
		assert!(filter.contains("livesync_core::live=trace"));
	}

	#[test]
	fn explicit_filter_wins() {
		let filter = builder()
			.with_log_level("trace")
			.with_filter(EnvFilter::builder().parse("warn").unwrap())
			.filter()
			.unwrap();
		assert_eq!(filter.to_string(), "warn");
	}
}
