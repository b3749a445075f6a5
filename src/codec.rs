//! Line codec (C1): CR LF-terminated command lines in, numbered responses out.

use crate::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one CR LF-terminated command line from `reader`.
///
/// Embedded CR bytes (not immediately followed by LF) are dropped
/// silently; a lone trailing CR right before the LF is stripped. The
/// line, including its own interior bytes, may not exceed `max_bytes` —
/// exceeding it without having seen an LF yields `Error::Oversize`.
pub async fn read_line<R>(reader: &mut R, max_bytes: usize) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut any_byte = false;
    let mut one = [0u8; 1];

    loop {
        let n = reader.read(&mut one).await?;
        if n == 0 {
            if !any_byte {
                return Err(Error::PeerClosed);
            }
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-line",
            )));
        }
        any_byte = true;
        let byte = one[0];

        if byte == b'\n' {
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }

        if byte == b'\r' {
            // Dropped: a real CR LF pair is handled above, any other CR
            // (embedded mid-line) is just discarded per §4.1.
            continue;
        }

        if buf.len() >= max_bytes {
            return Err(Error::Oversize);
        }
        buf.push(byte);
    }
}

/// Writes a single-line response: `"<code> <text>\r\n"`.
pub async fn write_response<W>(writer: &mut W, code: u16, text: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_multiline(writer, code, std::slice::from_ref(&text)).await
}

/// Writes a (possibly) multi-line response per RFC 959 §4.2: all but the
/// last line use `"<code>-<text>\r\n"`, the last uses `"<code> <text>\r\n"`.
/// A single-element `texts` behaves exactly like `write_response`.
pub async fn write_multiline<W>(writer: &mut W, code: u16, texts: &[&str]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = String::new();
    let last = texts.len().saturating_sub(1);
    for (i, text) in texts.iter().enumerate() {
        let sep = if i == last { ' ' } else { '-' };
        out.push_str(&format!("{code}{sep}{text}\r\n"));
    }
    writer.write_all(out.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_crlf_terminated_line() {
        let mut cursor = Cursor::new(b"RETR foo.txt\r\n".to_vec());
        let line = read_line(&mut cursor, 1024).await.unwrap();
        assert_eq!(line, "RETR foo.txt");
    }

    #[tokio::test]
    async fn strips_only_trailing_cr() {
        let mut cursor = Cursor::new(b"NOOP\n".to_vec());
        let line = read_line(&mut cursor, 1024).await.unwrap();
        assert_eq!(line, "NOOP");
    }

    #[tokio::test]
    async fn drops_embedded_cr_bytes() {
        let mut cursor = Cursor::new(b"FO\rO\r\n".to_vec());
        let line = read_line(&mut cursor, 1024).await.unwrap();
        assert_eq!(line, "FOO");
    }

    #[tokio::test]
    async fn peer_closed_before_any_byte() {
        let mut cursor = Cursor::new(Vec::new());
        let err = read_line(&mut cursor, 1024).await.unwrap_err();
        assert!(matches!(err, Error::PeerClosed));
    }

    #[tokio::test]
    async fn oversize_line_rejected() {
        let mut data = vec![b'A'; 2000];
        data.push(b'\n');
        let mut cursor = Cursor::new(data);
        let err = read_line(&mut cursor, 1024).await.unwrap_err();
        assert!(matches!(err, Error::Oversize));
    }

    #[tokio::test]
    async fn single_line_response_format() {
        let mut out = Vec::new();
        write_response(&mut out, 220, "Anonymous FTP server ready.")
            .await
            .unwrap();
        assert_eq!(out, b"220 Anonymous FTP server ready.\r\n");
    }

    #[tokio::test]
    async fn multiline_response_format() {
        let mut out = Vec::new();
        write_multiline(&mut out, 230, &["Login successful.", "Welcome."])
            .await
            .unwrap();
        assert_eq!(out, b"230-Login successful.\r\n230 Welcome.\r\n");
    }

    #[tokio::test]
    async fn single_element_multiline_equals_single_line() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        write_response(&mut a, 200, "ok").await.unwrap();
        write_multiline(&mut b, 200, &["ok"]).await.unwrap();
        assert_eq!(a, b);
    }
}
