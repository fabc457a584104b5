use crate::error::{HandlerError, UriError};
use crate::handler::{HandlerConfig, StreamingSession};
use crate::info::Info;
use crate::protocol::read_event;
use crate::session::SessionManager;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerUri {
    Stdio,
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for ServerUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "stdio://" {
            return Ok(ServerUri::Stdio);
        }
        if let Some(addr) = s.strip_prefix("tcp://").filter(|a| a.contains(':')) {
            return Ok(ServerUri::Tcp(addr.to_string()));
        }
        if let Some(path) = s.strip_prefix("unix://").filter(|p| !p.is_empty()) {
            return Ok(ServerUri::Unix(PathBuf::from(path)));
        }
        Err(UriError(s.to_string()))
    }
}

impl fmt::Display for ServerUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerUri::Stdio => write!(f, "stdio://"),
            ServerUri::Tcp(addr) => write!(f, "tcp://{addr}"),
            ServerUri::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Everything a connection needs. Cheap to clone into connection tasks.
#[derive(Clone)]
pub struct Server {
    config: HandlerConfig,
    info: Arc<Info>,
    sessions: Arc<SessionManager>,
}

impl Server {
    pub fn new(config: HandlerConfig, info: Info, sessions: Arc<SessionManager>) -> Self {
        Self {
            config,
            info: Arc::new(info),
            sessions,
        }
    }

    /// Process one connection's events in order until the client disconnects.
    pub async fn serve_connection<R, W>(&self, reader: R, writer: W) -> Result<(), HandlerError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send,
    {
        let mut reader = BufReader::new(reader);
        let mut session = StreamingSession::new(
            self.config.clone(),
            Arc::clone(&self.info),
            Arc::clone(&self.sessions),
            writer,
        );
        while let Some(event) = read_event(&mut reader).await? {
            session.handle_raw(event).await?;
        }
        Ok(())
    }

    pub async fn run(&self, uri: &ServerUri) -> std::io::Result<()> {
        match uri {
            ServerUri::Stdio => {
                info!("Serving on stdio");
                if let Err(e) = self
                    .serve_connection(tokio::io::stdin(), tokio::io::stdout())
                    .await
                {
                    warn!("Connection closed with error: {}", e);
                }
                Ok(())
            }
            ServerUri::Tcp(addr) => {
                let listener = TcpListener::bind(addr).await?;
                info!("Listening on tcp://{}", listener.local_addr()?);
                self.serve_tcp(listener).await
            }
            #[cfg(unix)]
            ServerUri::Unix(path) => {
                if path.exists() {
                    debug!("Removing stale socket {}", path.display());
                    std::fs::remove_file(path)?;
                }
                let listener = tokio::net::UnixListener::bind(path)?;
                info!("Listening on unix://{}", path.display());
                self.serve_unix(listener).await
            }
            #[cfg(not(unix))]
            ServerUri::Unix(_) => Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    }

    /// Accept TCP clients forever, one task per connection.
    pub async fn serve_tcp(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("Client connected: {}", peer);
            let server = self.clone();
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                match server.serve_connection(reader, writer).await {
                    Ok(()) => debug!("Client disconnected: {}", peer),
                    Err(e) => warn!("Connection {} closed with error: {}", peer, e),
                }
            });
        }
    }

    #[cfg(unix)]
    pub async fn serve_unix(&self, listener: tokio::net::UnixListener) -> std::io::Result<()> {
        loop {
            let (stream, _) = listener.accept().await?;
            debug!("Client connected on unix socket");
            let server = self.clone();
            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                if let Err(e) = server.serve_connection(reader, writer).await {
                    warn!("Connection closed with error: {}", e);
                }
            });
        }
    }
}
