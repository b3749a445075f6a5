//! File operation handlers (C5): RETR, STOR, LIST/NLST, MKD, RMD, DELE,
//! CWD, PWD. Each produces exactly one terminal response on the control
//! channel; transfer commands additionally send the `150` mark and
//! obtain their data socket strictly between the mark and the terminal
//! response (timing contract, §4.5/§9).

use crate::error::{Error, Result};
use crate::listing;
use crate::path::{self, JailedPath};
use crate::session::Session;
use crate::{codec, Result as CrateResult};
use std::os::unix::fs::OpenOptionsExt;
use tokio::fs;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};

const COPY_BUF_SIZE: usize = 8 * 1024;
const STOR_FILE_MODE: u32 = 0o644;

fn resolve(session: &Session, arg: &str) -> Result<JailedPath> {
    path::resolve(&session.root, &session.cwd, arg)
}

/// `RETR <path>`: streams a file from the server to the client.
pub async fn retr<S>(session: &mut Session, stream: &mut S, arg: &str) -> CrateResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let jailed = match resolve(session, arg) {
        Ok(j) => j,
        Err(e) => return send_error(stream, e).await,
    };

    let mut file = match fs::File::open(jailed.fs_path()).await {
        Ok(f) => f,
        Err(e) => return send_error(stream, map_open_error(e)).await,
    };

    codec::write_response(stream, 150, "Opening data connection for file transfer.").await?;

    let mut data = match session.data_channel.consume().await {
        Ok(d) => d,
        Err(e) => return send_error(stream, e).await,
    };

    match io::copy_buf(
        &mut io::BufReader::with_capacity(COPY_BUF_SIZE, &mut file),
        &mut data,
    )
    .await
    {
        Ok(n) => {
            session.bytes_transferred += n;
            data.shutdown().await.ok();
            codec::write_response(stream, 226, "Transfer complete.").await?;
        }
        Err(e) => {
            data.shutdown().await.ok();
            tracing::warn!(event = "transfer_aborted", error = %e, "transfer failed mid-stream");
            codec::write_response(stream, 426, "Connection closed; transfer aborted.").await?;
        }
    }

    Ok(())
}

/// `STOR <path>`: streams a file from the client to the server. Any
/// partially written file is removed if the transfer fails.
pub async fn stor<S>(session: &mut Session, stream: &mut S, arg: &str) -> CrateResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let jailed = match resolve(session, arg) {
        Ok(j) => j,
        Err(e) => return send_error(stream, e).await,
    };

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(STOR_FILE_MODE)
        .open(jailed.fs_path())
        .await
    {
        Ok(f) => f,
        Err(e) => return send_error(stream, map_open_error(e)).await,
    };

    codec::write_response(stream, 150, "Ready to receive data.").await?;

    let mut data = match session.data_channel.consume().await {
        Ok(d) => d,
        Err(e) => {
            fs::remove_file(jailed.fs_path()).await.ok();
            return send_error(stream, e).await;
        }
    };

    match io::copy(&mut data, &mut file).await {
        Ok(n) => {
            session.bytes_transferred += n;
            codec::write_response(stream, 226, "Transfer complete.").await?;
        }
        Err(e) => {
            drop(file);
            fs::remove_file(jailed.fs_path()).await.ok();
            tracing::warn!(event = "transfer_aborted", error = %e, "transfer failed mid-stream");
            codec::write_response(stream, 426, "Connection closed; transfer aborted.").await?;
        }
    }

    Ok(())
}

/// `LIST`/`NLST <path>`: streams a directory listing.
pub async fn list<S>(session: &mut Session, stream: &mut S, arg: &str) -> CrateResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let jailed = match resolve(session, arg) {
        Ok(j) => j,
        Err(e) => return send_error(stream, e).await,
    };

    let body = match listing::list_dir(jailed.fs_path()).await {
        Ok(body) => body,
        Err(e) => return send_error(stream, map_open_error_io(e)).await,
    };

    codec::write_response(stream, 150, "Here comes the directory listing.").await?;

    let mut data = match session.data_channel.consume().await {
        Ok(d) => d,
        Err(e) => return send_error(stream, e).await,
    };

    let mut payload = body;
    if !payload.is_empty() {
        payload.push_str("\r\n");
    }

    match data.write_all(payload.as_bytes()).await {
        Ok(()) => {
            data.shutdown().await.ok();
            codec::write_response(stream, 226, "Directory send OK.").await?;
        }
        Err(e) => {
            data.shutdown().await.ok();
            tracing::warn!(event = "transfer_aborted", error = %e, "transfer failed mid-stream");
            codec::write_response(stream, 426, "Connection closed; transfer aborted.").await?;
        }
    }

    Ok(())
}

/// `MKD <path>`: creates a directory and echoes its virtual path (§4.2,
/// `257 "<path>" created.`).
pub async fn mkd<S>(session: &mut Session, stream: &mut S, arg: &str) -> CrateResult<()>
where
    S: AsyncWrite + Unpin,
{
    let jailed = match resolve(session, arg) {
        Ok(j) => j,
        Err(e) => return send_error(stream, e).await,
    };

    match fs::create_dir(jailed.fs_path()).await {
        Ok(()) => {
            codec::write_response(
                stream,
                257,
                &format!("\"{}\" created.", quote_path(jailed.virtual_path())),
            )
            .await
        }
        Err(e) => send_error(stream, map_open_error(e)).await,
    }
}

/// `RMD <path>`: removes an empty directory.
pub async fn rmd<S>(session: &mut Session, stream: &mut S, arg: &str) -> CrateResult<()>
where
    S: AsyncWrite + Unpin,
{
    let jailed = match resolve(session, arg) {
        Ok(j) => j,
        Err(e) => return send_error(stream, e).await,
    };

    match fs::remove_dir(jailed.fs_path()).await {
        Ok(()) => codec::write_response(stream, 250, "Directory removed.").await,
        Err(e) => send_error(stream, map_open_error(e)).await,
    }
}

/// `DELE <path>`: removes a file.
pub async fn dele<S>(session: &mut Session, stream: &mut S, arg: &str) -> CrateResult<()>
where
    S: AsyncWrite + Unpin,
{
    let jailed = match resolve(session, arg) {
        Ok(j) => j,
        Err(e) => return send_error(stream, e).await,
    };

    match fs::remove_file(jailed.fs_path()).await {
        Ok(()) => codec::write_response(stream, 250, "File deleted.").await,
        Err(e) => send_error(stream, map_open_error(e)).await,
    }
}

/// `CWD <path>` (and `CDUP`, dispatched as `CWD ..`): changes the
/// session's virtual working directory after confirming the target
/// exists and is a directory.
pub async fn cwd<S>(session: &mut Session, stream: &mut S, arg: &str) -> CrateResult<()>
where
    S: AsyncWrite + Unpin,
{
    let jailed = match resolve(session, arg) {
        Ok(j) => j,
        Err(e) => return send_error(stream, e).await,
    };

    match fs::metadata(jailed.fs_path()).await {
        Ok(m) if m.is_dir() => {
            session.cwd = jailed.virtual_path().to_string();
            codec::write_response(
                stream,
                250,
                &format!("Directory changed to {}.", session.cwd),
            )
            .await
        }
        Ok(_) => send_error(stream, Error::AccessDenied("not a directory".into())).await,
        Err(e) => send_error(stream, map_open_error(e)).await,
    }
}

/// `PWD`: echoes the current virtual working directory.
pub async fn pwd<S>(session: &mut Session, stream: &mut S) -> CrateResult<()>
where
    S: AsyncWrite + Unpin,
{
    codec::write_response(
        stream,
        257,
        &format!(
            "\"{}\" is the current directory.",
            quote_path(&session.cwd)
        ),
    )
    .await
}

/// Doubles literal `"` bytes in a virtual path before it's wrapped in the
/// quotes of a `257` response, per RFC 959 §5.2 — a filename may legally
/// contain `"` since the jail only rejects NUL/CR/LF.
fn quote_path(virtual_path: &str) -> String {
    virtual_path.replace('"', "\"\"")
}

async fn send_error<S>(stream: &mut S, err: Error) -> CrateResult<()>
where
    S: AsyncWrite + Unpin,
{
    let code = err.response_code().unwrap_or(550);
    let text = match &err {
        Error::InvalidPath(_) | Error::AccessDenied(_) => {
            "Permission denied or invalid path.".to_string()
        }
        other => other.to_string(),
    };
    codec::write_response(stream, code, &text).await
}

fn map_open_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound => Error::InvalidPath("no such file or directory".into()),
        std::io::ErrorKind::PermissionDenied => {
            Error::AccessDenied("permission denied".into())
        }
        _ => Error::AccessDenied(e.to_string()),
    }
}

fn map_open_error_io(e: Error) -> Error {
    match e {
        Error::Io(io_err) => map_open_error(io_err),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:21".parse().unwrap()
    }

    #[test]
    fn quote_path_doubles_embedded_quotes() {
        assert_eq!(quote_path("/a/b"), "/a/b");
        assert_eq!(quote_path("/a\"b"), "/a\"\"b");
        assert_eq!(quote_path("\"\""), "\"\"\"\"");
    }

    #[tokio::test]
    async fn mkd_escapes_embedded_quote_in_response() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(dir.path().to_path_buf(), addr());
        let mut buf = Vec::new();

        mkd(&mut session, &mut buf, "a\"b").await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "257 \"/a\"\"b\" created.\r\n");
    }

    #[tokio::test]
    async fn mkd_rmd_dele_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(dir.path().to_path_buf(), addr());
        let mut buf = Vec::new();

        mkd(&mut session, &mut buf, "sub").await.unwrap();
        assert!(String::from_utf8(buf).unwrap().starts_with("257"));
        assert!(dir.path().join("sub").is_dir());

        let mut buf = Vec::new();
        rmd(&mut session, &mut buf, "sub").await.unwrap();
        assert!(String::from_utf8(buf).unwrap().starts_with("250"));
        assert!(!dir.path().join("sub").exists());

        std::fs::write(dir.path().join("f.txt"), b"hi").unwrap();
        let mut buf = Vec::new();
        dele(&mut session, &mut buf, "f.txt").await.unwrap();
        assert!(String::from_utf8(buf).unwrap().starts_with("250"));
        assert!(!dir.path().join("f.txt").exists());
    }

    #[tokio::test]
    async fn cwd_rejects_nonexistent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(dir.path().to_path_buf(), addr());
        let mut buf = Vec::new();
        cwd(&mut session, &mut buf, "nope").await.unwrap();
        assert!(String::from_utf8(buf).unwrap().starts_with("550"));
        assert_eq!(session.cwd, "/");
    }

    #[tokio::test]
    async fn cwd_into_subdir_updates_virtual_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("pub")).unwrap();
        let mut session = Session::new(dir.path().to_path_buf(), addr());
        let mut buf = Vec::new();
        cwd(&mut session, &mut buf, "pub").await.unwrap();
        assert_eq!(session.cwd, "/pub");
    }

    #[tokio::test]
    async fn pwd_reports_current_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(dir.path().to_path_buf(), addr());
        let mut buf = Vec::new();
        pwd(&mut session, &mut buf).await.unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "257 \"/\" is the current directory.\r\n"
        );
    }

    #[tokio::test]
    async fn retr_without_data_channel_yields_425() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), b"hello").unwrap();
        let mut session = Session::new(dir.path().to_path_buf(), addr());
        let mut buf = Vec::new();
        retr(&mut session, &mut buf, "f.txt").await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("150 "));
        assert!(text.contains("425 "));
    }

    #[tokio::test]
    async fn retr_missing_file_yields_550_with_no_150() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(dir.path().to_path_buf(), addr());
        let mut buf = Vec::new();
        retr(&mut session, &mut buf, "missing.txt").await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(!text.contains("150 "));
        assert!(text.starts_with("550"));
    }

    #[tokio::test]
    async fn retr_over_pasv_streams_full_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), b"hello world").unwrap();
        let mut session = Session::new(dir.path().to_path_buf(), addr());
        let message = session.data_channel.set_pasv(addr()).await.unwrap();
        let port = parse_pasv_port(&message);

        let client = tokio::spawn(async move {
            let mut sock = tokio::net::TcpStream::connect(("127.0.0.1", port))
                .await
                .unwrap();
            let mut received = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut sock, &mut received)
                .await
                .unwrap();
            received
        });

        let mut buf = Vec::new();
        retr(&mut session, &mut buf, "f.txt").await.unwrap();
        let received = client.await.unwrap();

        assert_eq!(received, b"hello world");
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("226 "));
        assert_eq!(session.bytes_transferred, 11);
    }

    #[tokio::test]
    async fn stor_failed_transfer_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(dir.path().to_path_buf(), addr());
        // No data channel armed: STOR should report 425 and leave no file.
        let mut buf = Vec::new();
        stor(&mut session, &mut buf, "partial.txt").await.unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("425 "));
        assert!(!dir.path().join("partial.txt").exists());
    }

    fn parse_pasv_port(message: &str) -> u16 {
        let parts: Vec<&str> = message
            .trim_start_matches("Entering Passive Mode (")
            .trim_end_matches(").")
            .split(',')
            .collect();
        let p1: u16 = parts[4].parse().unwrap();
        let p2: u16 = parts[5].parse().unwrap();
        (p1 << 8) | p2
    }
}
