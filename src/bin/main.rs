use std::process::ExitCode;

use clap::Parser;

use adp_server::config;
use adp_server::logging;
use adp_server::server::Server;

/// Request-serving core: driver framework, worker pool, fast-path file
/// responder and ADP template engine, configured from a single indentation
/// config file.
#[derive(Parser, Debug)]
#[command(name = "adp-server", version, about)]
struct Cli {
    /// Path to the server's configuration file.
    #[arg(short, long, default_value = "config.yaml", env = "ADP_SERVER_CONFIG")]
    config: String,

    /// Parse and validate the configuration, print it, and exit without
    /// starting the server.
    #[arg(long)]
    check_config: bool,

    /// Increase log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let app_config = match config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    config::display_config(&app_config.servers);

    if cli.check_config {
        return ExitCode::SUCCESS;
    }

    match Server::new(app_config).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server exited with error");
            ExitCode::FAILURE
        }
    }
}
