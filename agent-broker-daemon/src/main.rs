// main.rs does:
//  - Validate command line.
//  - Logging setup.
//  - Top level subsystem starting:
//     - ApiServer (accepts agent connections, serves introspection routes)

mod app_error;
mod server;

use std::net::SocketAddr;

use agent_broker::{Broker, BrokerConfig};
use anyhow::Result;
use clap::*;
use colored::Colorize;
use env_logger::{Builder, Env};
use tokio::time::Duration;
use tokio_graceful_shutdown::Toplevel;

use server::ApiServer;

#[derive(Parser)]
#[clap(
    name = "agent-broker-daemon",
    about = "Hosts the agent-connection broker behind a minimal HTTP surface",
    rename_all = "kebab-case",
    author,
    version
)]
pub enum Command {
    #[clap(name = "run")]
    Run {
        /// Address the broker listens on for agent WebSocket upgrades.
        #[clap(long, default_value = "0.0.0.0:9200")]
        bind: SocketAddr,
    },
}

impl Command {
    pub async fn execute(self) -> Result<()> {
        match self {
            Command::Run { bind } => {
                let broker = Broker::new(BrokerConfig::default());
                let api_server = ApiServer::new(bind, broker);

                Toplevel::new()
                    .start("ApiServer", |a| api_server.run(a))
                    .catch_signals()
                    .handle_shutdown_requests(Duration::from_millis(1000))
                    .await
                    .map_err(Into::into)
            }
        }
    }
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).unwrap();

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let cmd = Command::parse();

    if let Err(err) = cmd.execute().await {
        println!("{}", err.to_string().red());
        std::process::exit(1);
    }
}
