//! Connection supervisor (C7): binds the control listener, accepts
//! connections, and spawns one isolated worker task per session. No
//! state is shared across workers (§5).

use crate::config::Config;
use crate::error::Result;
use crate::session::Session;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

/// Owns the control-channel listener and the (immutable, shared-by-read-only)
/// server configuration.
pub struct Server {
    config: Arc<Config>,
    listener: TcpListener,
}

impl Server {
    /// Binds the control-channel listener at `config.bind_address:config.port`.
    pub async fn bind(config: Config) -> Result<Self> {
        let addr = format!("{}:{}", config.bind_address, config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(event = "listening", address = %addr, "control channel bound");
        Ok(Self {
            config: Arc::new(config),
            listener,
        })
    }

    /// The address the control listener actually bound to — useful when
    /// `config.port` was `0` and the OS picked an ephemeral port.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop forever, spawning one task per connection.
    /// A single `accept` failure is logged and retried; it never brings
    /// down the listener.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(event = "accept_failed", error = %e, "failed to accept connection");
                    continue;
                }
            };

            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                info!(event = "connection_accepted", peer = %peer, "client connected");
                if let Err(e) = handle_connection(stream, &config).await {
                    error!(event = "connection_error", peer = %peer, error = %e, "session ended with error");
                } else {
                    info!(event = "connection_closed", peer = %peer, "session ended");
                }
            });
        }
    }
}

/// Drives a single accepted connection end to end: builds a fresh
/// `Session`, runs it to completion, and lets all session resources
/// (data socket, PASV listener, open files) drop at function exit
/// regardless of how the session ended.
async fn handle_connection(mut stream: TcpStream, config: &Config) -> Result<()> {
    let local_addr = stream.local_addr()?;
    let mut session = Session::new(config.root_dir.clone(), local_addr);
    session.run(&mut stream, config).await
}
