use clap::Parser;
use dotenvy::dotenv;
use rendezvous_chat::config::{self, AppConfig};
use rendezvous_chat::network::{ChatListener, RegistryClient};
use rendezvous_chat::ui::ConsoleApp;
use tokio::io::{BufReader, stdin};
use tokio::sync::{mpsc, watch};

#[derive(Parser)]
#[command(
    name = "rendezvous_chat",
    version,
    about = "Chat directly with peers found through a node master"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Nickname to register with
    #[arg(long, env = "CHAT_NICKNAME")]
    nickname: Option<String>,
    /// Port of the local chat listener
    #[arg(long, env = "CHAT_PORT")]
    port: Option<u16>,
    /// Node master host
    #[arg(long, env = "NODEMASTER_HOST")]
    server: Option<String>,
    /// Node master port
    #[arg(long, env = "NODEMASTER_PORT")]
    server_port: Option<u16>,
}

impl Cli {
    fn apply(self, mut config: AppConfig) -> AppConfig {
        if let Some(nickname) = self.nickname {
            config.nickname = nickname;
        }
        if let Some(port) = self.port {
            config.chat_port = port;
        }
        if let Some(server) = self.server {
            config.server_host = server;
        }
        if let Some(server_port) = self.server_port {
            config.server_port = server_port;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    // Khởi tạo Logger để debug
    env_logger::init();

    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let app_config = cli.apply(config::load_config(&config_path));
    app_config.validate()?;

    // Network -> UI
    let (event_tx, event_rx) = mpsc::channel(256);
    let (session_tx, session_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Without a listener we can still start chats, just not receive them.
    match ChatListener::bind(
        &app_config.chat_bind_address(),
        &app_config.nickname,
        app_config.timing,
    )
    .await
    {
        Ok(listener) => {
            tokio::spawn(listener.run(session_tx, event_tx.clone(), shutdown_rx));
        }
        Err(err) => {
            log::error!("Incoming chats disabled: {err}");
            println!("Could not open chat port {}: incoming chats are disabled.", app_config.chat_port);
        }
    }

    let (client, roster) = match RegistryClient::connect(&app_config, event_tx.clone()).await {
        Ok(connected) => connected,
        Err(err) => {
            log::error!("Could not register with {}: {err}", app_config.server_address());
            let _ = shutdown_tx.send(true);
            return Err(err.into());
        }
    };

    let app = ConsoleApp::new(
        client,
        roster,
        app_config.timing,
        event_tx,
        event_rx,
        session_rx,
    );
    app.run(BufReader::new(stdin())).await;

    let _ = shutdown_tx.send(true);
    log::info!("Bye");
    Ok(())
}
