use clap::Parser;

use croupier_gateway::config::DEFAULT_GAME_SERVER_PORT;
use croupier_server::logging::init_logging;
use croupier_server::{run_server, ServerConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "croupier-server")]
#[command(about = "HTTP polling gateway for the card game server")]
#[command(version)]
struct Cli {
    /// Game server TCP port
    #[arg(env = "GAME_SERVER_PORT", default_value_t = DEFAULT_GAME_SERVER_PORT)]
    game_port: u16,

    /// Game server host
    #[arg(long, env = "GAME_SERVER_HOST", default_value = "localhost")]
    game_host: String,

    /// Emit JSON log lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Enable debug logging
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.log_json);

    let mut config = ServerConfig::default().with_game_server(cli.game_host, cli.game_port);
    config.log_json = cli.log_json;

    if cli.debug {
        tracing::debug!("Server configuration: {:?}", config);
    }

    run_server(config).await
}
