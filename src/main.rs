use std::process::ExitCode;

fn main() -> ExitCode {
	livesync_server::init()
}
