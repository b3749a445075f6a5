//! Session state machine (C6): the top-level per-connection loop —
//! login gate, verb dispatch, response-code selection.

use crate::command::Command;
use crate::commands;
use crate::data_channel::DataChannel;
use crate::error::{Error, Result};
use crate::{codec, config::Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Login state (§3 `auth`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NeedUser,
    NeedPass,
    LoggedIn,
}

/// Transfer type (§3 `type`). Only `Image` (`TYPE I`) is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Image,
}

/// Per-connection session state. One instance per accepted control
/// socket; destroyed on disconnect.
pub struct Session {
    pub(crate) root: PathBuf,
    pub(crate) cwd: String,
    pub(crate) auth: AuthState,
    pub(crate) transfer_type: TransferType,
    pub(crate) data_channel: DataChannel,
    pub(crate) bytes_transferred: u64,
    pub(crate) control_local_addr: SocketAddr,
}

impl Session {
    /// Builds a fresh session rooted at `root`, with `cwd` initially
    /// equal to `root` (invariant I1).
    pub fn new(root: PathBuf, control_local_addr: SocketAddr) -> Self {
        Self {
            root,
            cwd: "/".to_string(),
            auth: AuthState::NeedUser,
            transfer_type: TransferType::Image,
            data_channel: DataChannel::None,
            bytes_transferred: 0,
            control_local_addr,
        }
    }

    /// Runs the session loop to completion: sends the greeting, reads and
    /// dispatches commands until QUIT, peer close, or idle timeout.
    /// Always returns `Ok(())` — control-channel teardown is the normal
    /// exit path, not an error (§7: `PeerClosed`/`Io` end the session
    /// silently).
    pub async fn run<S>(&mut self, stream: &mut S, config: &Config) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        codec::write_response(stream, 220, "Anonymous FTP server ready.").await?;

        let idle_timeout = Duration::from_secs(config.control_idle_timeout_secs);
        loop {
            let read = tokio::time::timeout(
                idle_timeout,
                codec::read_line(stream, config.max_command_line_bytes),
            )
            .await;

            let line = match read {
                Err(_elapsed) => {
                    info!(event = "control_idle_timeout", "closing idle session");
                    return Ok(());
                }
                Ok(Err(Error::PeerClosed)) => {
                    debug!(event = "peer_closed", "client closed control connection");
                    return Ok(());
                }
                Ok(Err(Error::Oversize)) => {
                    codec::write_response(stream, 500, "Command line too long.").await?;
                    return Ok(());
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(line)) => line,
            };

            let cmd = Command::parse(&line);
            if self.dispatch(&cmd, stream).await? {
                return Ok(());
            }
        }
    }

    /// Dispatches one parsed command. Returns `Ok(true)` when the session
    /// should end (QUIT, or a control-socket write failure already
    /// reported upstream as `Err`).
    async fn dispatch<S>(&mut self, cmd: &Command, stream: &mut S) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.auth != AuthState::LoggedIn {
            return self.dispatch_unauthenticated(cmd, stream).await;
        }

        match cmd.verb.as_str() {
            "USER" => {
                codec::write_response(stream, 530, "Already logged in.").await?;
                Ok(false)
            }
            "PASS" => {
                codec::write_response(stream, 503, "Bad sequence of commands.").await?;
                Ok(false)
            }
            "QUIT" => {
                codec::write_response(stream, 221, "Goodbye.").await?;
                Ok(true)
            }
            "NOOP" => {
                codec::write_response(stream, 200, "NOOP ok.").await?;
                Ok(false)
            }
            "SYST" => {
                codec::write_response(stream, 215, "UNIX Type: L8").await?;
                Ok(false)
            }
            "TYPE" => {
                if cmd.arg.eq_ignore_ascii_case("I") {
                    self.transfer_type = TransferType::Image;
                    codec::write_response(stream, 200, "Type set to I.").await?;
                } else {
                    codec::write_response(
                        stream,
                        504,
                        "Command not implemented for that parameter.",
                    )
                    .await?;
                }
                Ok(false)
            }
            "PORT" => {
                match self.data_channel.set_port(&cmd.arg) {
                    Ok(()) => codec::write_response(stream, 200, "PORT command successful.").await?,
                    Err(e) => {
                        codec::write_response(stream, 501, &e.to_string()).await?;
                    }
                }
                Ok(false)
            }
            "PASV" => {
                match self.data_channel.set_pasv(self.control_local_addr).await {
                    Ok(message) => codec::write_response(stream, 227, &message).await?,
                    Err(e) => {
                        warn!(event = "pasv_failed", error = %e, "PASV setup failed");
                        codec::write_response(stream, 425, &e.to_string()).await?;
                    }
                }
                Ok(false)
            }
            "RETR" => {
                commands::retr(self, stream, &cmd.arg).await?;
                Ok(false)
            }
            "STOR" => {
                commands::stor(self, stream, &cmd.arg).await?;
                Ok(false)
            }
            "LIST" | "NLST" => {
                commands::list(self, stream, &cmd.arg).await?;
                Ok(false)
            }
            "MKD" => {
                commands::mkd(self, stream, &cmd.arg).await?;
                Ok(false)
            }
            "RMD" => {
                commands::rmd(self, stream, &cmd.arg).await?;
                Ok(false)
            }
            "DELE" => {
                commands::dele(self, stream, &cmd.arg).await?;
                Ok(false)
            }
            "CWD" => {
                commands::cwd(self, stream, &cmd.arg).await?;
                Ok(false)
            }
            "CDUP" => {
                commands::cwd(self, stream, "..").await?;
                Ok(false)
            }
            "PWD" => {
                commands::pwd(self, stream).await?;
                Ok(false)
            }
            _ => {
                codec::write_response(stream, 500, "Command not implemented.").await?;
                Ok(false)
            }
        }
    }

    async fn dispatch_unauthenticated<S>(&mut self, cmd: &Command, stream: &mut S) -> Result<bool>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match (self.auth, cmd.verb.as_str()) {
            (AuthState::NeedUser, "USER") => {
                if cmd.arg == "anonymous" {
                    self.auth = AuthState::NeedPass;
                    codec::write_response(
                        stream,
                        331,
                        "Anonymous login ok, send your complete email as password.",
                    )
                    .await?;
                } else {
                    codec::write_response(stream, 530, "Only anonymous login is allowed.").await?;
                }
                Ok(false)
            }
            (AuthState::NeedUser, "PASS") => {
                codec::write_response(stream, 503, "Login with USER first.").await?;
                Ok(false)
            }
            (AuthState::NeedPass, "USER") => {
                // A fresh USER resets the login handshake rather than
                // failing it outright.
                if cmd.arg == "anonymous" {
                    codec::write_response(
                        stream,
                        331,
                        "Anonymous login ok, send your complete email as password.",
                    )
                    .await?;
                } else {
                    self.auth = AuthState::NeedUser;
                    codec::write_response(stream, 530, "Only anonymous login is allowed.").await?;
                }
                Ok(false)
            }
            (AuthState::NeedPass, "PASS") => {
                if is_email_shaped(&cmd.arg) {
                    self.auth = AuthState::LoggedIn;
                    info!(event = "login_success", "anonymous login accepted");
                    codec::write_multiline(
                        stream,
                        230,
                        &[
                            "Login successful.",
                            "Welcome to the FTP server! You are logged in as anonymous.",
                        ],
                    )
                    .await?;
                } else {
                    self.auth = AuthState::NeedUser;
                    codec::write_response(stream, 530, "Invalid email format for password.")
                        .await?;
                }
                Ok(false)
            }
            (_, "QUIT") => {
                codec::write_response(stream, 221, "Goodbye.").await?;
                Ok(true)
            }
            (_, "NOOP") => {
                codec::write_response(stream, 200, "NOOP ok.").await?;
                Ok(false)
            }
            _ => {
                codec::write_response(stream, 530, "Please login with USER and PASS.").await?;
                Ok(false)
            }
        }
    }
}

/// Validates the anonymous-login password as email-shaped:
/// `^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$`, ASCII
/// case-insensitive.
fn is_email_shaped(candidate: &str) -> bool {
    let Some((local, domain)) = candidate.split_once('@') else {
        return false;
    };
    if local.is_empty() || !local.bytes().all(is_local_byte) {
        return false;
    }
    if domain.is_empty() || !domain.bytes().all(is_domain_byte) {
        return false;
    }
    match domain.rfind('.') {
        Some(idx) => {
            let tld = &domain[idx + 1..];
            tld.len() >= 2 && tld.bytes().all(|b| b.is_ascii_alphabetic())
        }
        None => false,
    }
}

fn is_local_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'%' | b'+' | b'-')
}

fn is_domain_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-')
}
