use anyhow::Context;
use arthuron_core::ArthuronConfig;
use arthuron_gateway::{GatewayServer, SessionNegotiator, TtsService};
use arthuron_voice::{OutputFormat, Relay, RelayHandle, WebSocketConnector};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "arthuron", author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "arthuron.toml")]
    config: PathBuf,

    /// Address to bind, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overrides the config file and PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long, env = "ARTHURON_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves on Ctrl-C, after asking the relay to stop.
async fn shutdown_signal(relay: Option<RelayHandle>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl-C, shutting down...");
    if let Some(relay) = relay {
        relay.shutdown();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = ArthuronConfig::load_or_default(&args.config);
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let format = OutputFormat::from_identifier(&config.synthesis.output_format).unwrap_or_else(|| {
        warn!(
            "Unknown output format {:?}, streaming as {}",
            config.synthesis.output_format,
            OutputFormat::default().mime_type()
        );
        OutputFormat::default()
    });

    let (tts, worker) = match config.synthesis.validate() {
        Ok(()) => {
            let connector = WebSocketConnector::new(&config.synthesis)?;
            info!("Starting relay to {}", connector.url().host_str().unwrap_or("?"));
            let (relay, worker) = Relay::spawn(&config.relay, Arc::new(connector));
            (TtsService::Ready(relay), Some(worker))
        }
        Err(e) => {
            warn!("Text-to-speech disabled: {}", e);
            (TtsService::Unavailable(e), None)
        }
    };

    let session = SessionNegotiator::new(&config.realtime)?;
    if config.realtime.api_key.is_none() {
        warn!("OPENAI_API_KEY not set, /session will fail");
    }

    let relay = match &tts {
        TtsService::Ready(relay) => Some(relay.clone()),
        TtsService::Unavailable(_) => None,
    };
    let server = GatewayServer::new(tts, session, format, &config.server);
    let served = server.serve(shutdown_signal(relay.clone())).await;

    // The server may have failed before any signal arrived.
    if let Some(relay) = relay {
        relay.shutdown();
    }
    if let Some(worker) = worker {
        worker.await.context("Relay worker panicked")?;
    }
    served?;
    info!("Arthuron stopped");
    Ok(())
}
