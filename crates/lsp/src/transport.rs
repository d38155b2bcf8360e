//! Minimal `Content-Length`-framed stdio transport for the `iccheck lsp`
//! subcommand. The spec treats JSON-RPC framing as an external collaborator;
//! this module is the thinnest adapter that lets a real LSP client talk to
//! [`crate::service::LspService`] over standard input/output.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::service::{LspService, OutboundConn};

struct StdoutConn {
    out: Mutex<io::Stdout>,
}

impl OutboundConn for StdoutConn {
    fn notify(&self, method: &str, params: Value) {
        let message = serde_json::json!({"jsonrpc": "2.0", "method": method, "params": params});
        let _ = write_message(&mut *self.out.lock().expect("stdout mutex poisoned"), &message);
    }
}

fn write_message<W: Write>(writer: &mut W, message: &Value) -> io::Result<()> {
    let body = serde_json::to_vec(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
    writer.write_all(&body)?;
    writer.flush()
}

/// Reads one `Content-Length`-framed JSON-RPC message from `reader`.
/// Returns `Ok(None)` on a clean EOF before any header line is read.
fn read_message<R: BufRead>(reader: &mut R) -> io::Result<Option<Value>> {
    let mut content_length: Option<usize> = None;
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Content-Length:") {
            content_length = value.trim().parse().ok();
        }
    }

    let length = content_length
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header"))?;
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;
    let message = serde_json::from_slice(&body)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(message))
}

/// Runs the LSP service over standard I/O until stdin closes. `deadline` is
/// the per-analysis cancellation budget (§5), not an overall session limit.
pub fn run_stdio(deadline: Duration) -> io::Result<()> {
    let conn = Arc::new(StdoutConn { out: Mutex::new(io::stdout()) });
    let service = LspService::new(conn, deadline);

    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let stdout = io::stdout();

    loop {
        let message = match read_message(&mut reader) {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "malformed LSP frame; stopping");
                return Err(e);
            }
        };

        if let Some(response) = service.handle_message(message) {
            let mut out = stdout.lock();
            write_message(&mut out, &response)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn write_then_read_round_trips_a_message() {
        let mut buf = Vec::new();
        write_message(&mut buf, &serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap();

        let mut reader = BufReader::new(Cursor::new(buf));
        let message = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(message["method"], "ping");
    }

    #[test]
    fn read_message_returns_none_on_clean_eof() {
        let mut reader = BufReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(read_message(&mut reader).unwrap().is_none());
    }

    #[test]
    fn read_message_rejects_missing_content_length() {
        let mut reader = BufReader::new(Cursor::new(b"\r\n".to_vec()));
        assert!(read_message(&mut reader).is_err());
    }
}
