use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::err::Error;

/// Start a graceful shutdown:
/// * Cancel the token when a shutdown signal is received, which stops
///   the web server from accepting requests and ends open streams.
///
/// A second signal will force an immediate shutdown.
pub fn graceful_shutdown(canceller: CancellationToken) -> JoinHandle<()> {
	tokio::spawn(async move {
		let signal = match listen().await {
			Ok(signal) => signal,
			Err(e) => {
				error!("Failed to listen to shutdown signal: {e}");
				return;
			}
		};
		info!("{signal} received. Waiting for graceful shutdown... A second signal will force an immediate shutdown");
		canceller.cancel();
		if let Ok(signal) = listen().await {
			warn!("{signal} received during graceful shutdown. Terminate immediately...");
			std::process::exit(1);
		}
	})
}

#[cfg(unix)]
pub async fn listen() -> Result<String, Error> {
	// Import the OS signals
	use tokio::signal::unix::{SignalKind, signal};
	// Get the operating system signal types
	let mut sighup = signal(SignalKind::hangup())?;
	let mut sigint = signal(SignalKind::interrupt())?;
	let mut sigquit = signal(SignalKind::quit())?;
	let mut sigterm = signal(SignalKind::terminate())?;
	// Listen and wait for the system signals
	tokio::select! {
		_ = sighup.recv() => Ok(String::from("SIGHUP")),
		_ = sigint.recv() => Ok(String::from("SIGINT")),
		_ = sigquit.recv() => Ok(String::from("SIGQUIT")),
		_ = sigterm.recv() => Ok(String::from("SIGTERM")),
	}
}

#[cfg(not(unix))]
pub async fn listen() -> Result<String, Error> {
	// Listen and wait for the system signals
	tokio::signal::ctrl_c().await?;
	Ok(String::from("CTRL-C"))
}
