//! Data-channel manager (C4): owns the PORT target / PASV listener
//! lifecycle and produces exactly one data socket per consumption.

use crate::error::{Error, Result};
use socket2::{Domain, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::{TcpListener, TcpStream};

/// Backlog for the PASV listening socket — a data channel is consumed by
/// exactly one client connection, so there is never a reason to queue more.
const PASV_BACKLOG: i32 = 1;

/// The session's data-channel state (§3, `DataChannel`).
pub enum DataChannel {
    /// No PORT/PASV armed.
    None,
    /// Client asked the server to connect out to this address (PORT).
    Port(SocketAddr),
    /// Server is listening for the client to connect in (PASV).
    Pasv(TcpListener),
}

impl Default for DataChannel {
    fn default() -> Self {
        DataChannel::None
    }
}

impl DataChannel {
    /// Handles `PORT h1,h2,h3,h4,p1,p2`. Replaces any channel already
    /// armed, closing a prior PASV listener in the process.
    pub fn set_port(&mut self, arg: &str) -> Result<()> {
        let parts: Vec<&str> = arg.split(',').collect();
        if parts.len() != 6 {
            return Err(Error::SyntaxError("PORT requires six components".into()));
        }

        let mut nums = [0u8; 6];
        for (slot, part) in nums.iter_mut().zip(parts.iter()) {
            *slot = part
                .parse::<u16>()
                .ok()
                .filter(|n| *n <= u8::MAX as u16)
                .ok_or_else(|| Error::SyntaxError(format!("invalid PORT component: {part}")))?
                as u8;
        }

        let addr = SocketAddrV4::new(
            Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]),
            ((nums[4] as u16) << 8) | nums[5] as u16,
        );

        *self = DataChannel::Port(SocketAddr::V4(addr));
        Ok(())
    }

    /// Handles `PASV`: binds a fresh ephemeral-port listener and composes
    /// the full `227` response text. The caller sends this text as-is;
    /// nothing further is sent on success (§9, resolved open question).
    pub async fn set_pasv(&mut self, control_local_addr: SocketAddr) -> Result<String> {
        let ip = match control_local_addr.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => {
                return Err(Error::DataChannelFailed(
                    "control connection is not IPv4".into(),
                ))
            }
        };

        let socket = Socket::new(Domain::IPV4, Type::STREAM, None)
            .map_err(|e| Error::DataChannelFailed(format!("socket create failed: {e}")))?;
        socket
            .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())
            .map_err(|e| Error::DataChannelFailed(format!("bind failed: {e}")))?;
        let local_port = socket
            .local_addr()
            .map_err(|e| Error::DataChannelFailed(format!("getsockname failed: {e}")))?
            .as_socket_ipv4()
            .ok_or_else(|| Error::DataChannelFailed("getsockname returned non-IPv4".into()))?
            .port();
        socket
            .listen(PASV_BACKLOG)
            .map_err(|e| Error::DataChannelFailed(format!("listen failed: {e}")))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::DataChannelFailed(format!("set_nonblocking failed: {e}")))?;

        let listener = TcpListener::from_std(socket.into())
            .map_err(|e| Error::DataChannelFailed(format!("listener setup failed: {e}")))?;

        let octets = ip.octets();
        let p1 = (local_port >> 8) as u8;
        let p2 = (local_port & 0xff) as u8;
        let message = format!(
            "Entering Passive Mode ({},{},{},{},{},{}).",
            octets[0], octets[1], octets[2], octets[3], p1, p2
        );

        *self = DataChannel::Pasv(listener);
        Ok(message)
    }

    /// Consumes the armed channel, producing exactly one data socket.
    /// Resets to `None` regardless of outcome (invariant I3/I5).
    pub async fn consume(&mut self) -> Result<TcpStream> {
        match std::mem::replace(self, DataChannel::None) {
            DataChannel::None => Err(Error::NoDataChannel),
            DataChannel::Port(addr) => TcpStream::connect(addr)
                .await
                .map_err(|e| Error::DataChannelFailed(format!("connect failed: {e}"))),
            DataChannel::Pasv(listener) => {
                // The listener is dropped (and so closed) when this
                // function returns, win or lose — it's a local that was
                // moved out of `self` by the match.
                listener
                    .accept()
                    .await
                    .map(|(stream, _)| stream)
                    .map_err(|e| Error::DataChannelFailed(format!("accept failed: {e}")))
            }
        }
    }

    /// Closes and discards any armed channel without consuming it (used
    /// when the session ends with a channel still armed, per I5).
    pub fn close(&mut self) {
        *self = DataChannel::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn parses_valid_port_argument() {
        let mut dc = DataChannel::None;
        dc.set_port("127,0,0,1,195,80").unwrap();
        match dc {
            DataChannel::Port(SocketAddr::V4(addr)) => {
                assert_eq!(*addr.ip(), Ipv4Addr::new(127, 0, 0, 1));
                assert_eq!(addr.port(), (195u16 << 8) | 80);
            }
            _ => panic!("expected Port variant"),
        }
    }

    #[test]
    fn rejects_wrong_component_count() {
        let mut dc = DataChannel::None;
        assert!(dc.set_port("127,0,0,1,195").is_err());
    }

    #[test]
    fn rejects_out_of_range_component() {
        let mut dc = DataChannel::None;
        assert!(dc.set_port("127,0,0,1,999,80").is_err());
    }

    #[tokio::test]
    async fn consume_with_no_channel_errors() {
        let mut dc = DataChannel::None;
        let err = dc.consume().await.unwrap_err();
        assert!(matches!(err, Error::NoDataChannel));
    }

    #[tokio::test]
    async fn port_connect_failure_yields_data_channel_failed() {
        // Nothing is listening on this port; connect should fail quickly.
        let mut dc = DataChannel::None;
        dc.set_port("127,0,0,1,0,1").unwrap();
        let err = dc.consume().await.unwrap_err();
        assert!(matches!(err, Error::DataChannelFailed(_)));
    }

    #[tokio::test]
    async fn pasv_then_connect_then_consume_round_trips() {
        let mut dc = DataChannel::None;
        let control_addr: SocketAddr = "127.0.0.1:21".parse().unwrap();
        let message = dc.set_pasv(control_addr).await.unwrap();
        assert!(message.starts_with("Entering Passive Mode ("));
        assert!(message.ends_with(")."));

        let port: u16 = {
            let parts: Vec<&str> = message
                .trim_start_matches("Entering Passive Mode (")
                .trim_end_matches(").")
                .split(',')
                .collect();
            let p1: u16 = parts[4].parse().unwrap();
            let p2: u16 = parts[5].parse().unwrap();
            (p1 << 8) | p2
        };

        let client = tokio::spawn(async move {
            TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        });

        let server_side = dc.consume().await.unwrap();
        drop(server_side);
        client.await.unwrap();
    }
}
