//! stem-cli — probe a server from the command line.
//!
//! ```text
//! stem-cli --route game.room.join --data '{"room":1}'    Send a request
//! stem-cli --route game.chat.say --data hi --notify      Send a notify
//! stem-cli --addr host:3014 --tls --insecure ...         TLS, any cert
//! stem-cli --config <path>                               Load a config TOML
//! stem-cli --gen-config                                  Print default config
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stem_cli::config::CliConfig;
use stem_core::{Client, Message, MessageReceiver};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "stem-cli", about = "Connect, send one message, print what comes back")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "stem-cli.toml")]
    config: PathBuf,

    /// Server address (`host:port`), overrides the config file.
    #[arg(short, long)]
    addr: Option<String>,

    /// Connect over TLS.
    #[arg(long)]
    tls: bool,

    /// Accept any server certificate (implies --tls).
    #[arg(long)]
    insecure: bool,

    /// Route to send to. Without it the client only listens.
    #[arg(short, long)]
    route: Option<String>,

    /// Message body.
    #[arg(short, long, default_value = "")]
    data: String,

    /// Send a notify instead of a request.
    #[arg(long)]
    notify: bool,

    /// How long to keep printing inbound messages.
    #[arg(long, default_value_t = 3000)]
    wait_ms: u64,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", CliConfig::default().to_toml()?);
        return Ok(());
    }

    let mut config = CliConfig::load(&cli.config);
    if let Some(addr) = cli.addr {
        config.client.addr = addr;
    }
    let insecure = cli.insecure || config.tls.insecure;
    let tls = cli.tls || insecure || config.tls.enabled;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("stem-cli v{}", env!("CARGO_PKG_VERSION"));
    info!(addr = %config.client.addr, tls, "connecting");

    let client = Client::new(config.client);
    if tls {
        if insecure {
            warn!("server certificate verification disabled");
        }
        client.connect_tls(insecure).await?;
    } else {
        client.connect().await?;
    }
    let mut inbound = client
        .msg_channel()
        .ok_or("inbound channel already taken")?;

    if let Some(route) = cli.route {
        let data = cli.data.into_bytes();
        if cli.notify {
            client.send_notify(route.as_str(), data).await?;
            info!(%route, "notify sent");
        } else {
            let id = client.send_request(route.as_str(), data).await?;
            info!(%route, id, "request sent");
        }
    }

    print_until(&mut inbound, Duration::from_millis(cli.wait_ms)).await;

    client.disconnect().await;
    client.wait_stopped().await;
    Ok(())
}

/// Print inbound messages until `wait` elapses, the server goes away, or
/// Ctrl-C.
async fn print_until(inbound: &mut MessageReceiver, wait: Duration) {
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            message = inbound.recv() => match message {
                Some(message) => print_message(&message),
                None => {
                    info!("connection closed");
                    break;
                }
            },
        }
    }
}

fn print_message(message: &Message) {
    let status = if message.error { " error" } else { "" };
    println!(
        "{:?} id={} route={}{status} {}",
        message.kind,
        message.id,
        message.route,
        String::from_utf8_lossy(&message.data),
    );
}
