mod start;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
pub use start::StartCommandArguments;

use crate::cnf::{PKG_NAME, PKG_VERSION};

const INFO: &str = "
To get started using livesync, start a server and point a client at its API:

  $ livesync start --entity tasks --bind 127.0.0.1:8000

Every entity passed with --entity can then be queried, changed and
subscribed to under http://127.0.0.1:8000/api/<entity>.
";

#[derive(Parser, Debug)]
#[command(name = "livesync command-line interface and server", bin_name = PKG_NAME)]
#[command(about = INFO, before_help = "livesync server")]
#[command(disable_version_flag = true, arg_required_else_help = true)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	#[command(about = "Start the live query server")]
	Start(StartCommandArguments),
	#[command(about = "Output the command-line tool and server version information")]
	Version,
}

pub fn init() -> ExitCode {
	let args = Cli::parse();
	let output = match args.command {
		Commands::Start(args) => start::init(args),
		Commands::Version => {
			println!("{PKG_NAME} {}", *PKG_VERSION);
			Ok(())
		}
	};
	if let Err(e) = output {
		error!("{e:#}");
		ExitCode::FAILURE
	} else {
		ExitCode::SUCCESS
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_start_arguments() {
		let cli = Cli::try_parse_from([
			"livesync",
			"start",
			"--bind",
			"0.0.0.0:9000",
			"--entity",
			"tasks",
			"--entity",
			"links:from,to",
			"--live-query-storage",
			"entity",
		])
		.unwrap();
		let Commands::Start(args) = cli.command else {
			panic!("expected the start command");
		};
		assert_eq!(args.listen_address.port(), 9000);
		assert_eq!(args.entities.len(), 2);
		assert_eq!(args.entities[1].key, "links");
		assert_eq!(args.storage, crate::dbs::StorageKind::Entity);
	}

	#[test]
	fn start_requires_an_entity() {
		assert!(Cli::try_parse_from(["livesync", "start"]).is_err());
	}
}
