use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tts_stream_server::args::Args;
use tts_stream_server::info::Info;
use tts_stream_server::server::Server;
use tts_stream_server::session::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout may be the protocol transport
    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting text to speech server");
    info!("Models directory: {}", args.models_dir.display());

    let info = Info::new(&args.models_dir, args.streaming);
    info!(
        "Advertising {} voice(s), streaming {}",
        info.tts.iter().map(|p| p.voices.len()).sum::<usize>(),
        if args.streaming { "enabled" } else { "disabled" }
    );

    let sessions = Arc::new(SessionManager::new(Arc::new(args.engine_factory())));

    // Make sure the default voice loads before accepting clients.
    sessions.get_session(None).await?;
    info!("Default voice '{}' ready", args.voice);

    let server = Server::new(args.handler_config(), info, sessions);

    tokio::select! {
        result = server.run(&args.uri) => {
            if let Err(e) = result {
                error!("Server on {} failed: {}", args.uri, e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    info!("Process complete.");
    Ok(())
}
