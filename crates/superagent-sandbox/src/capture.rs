//! Incremental capture of a child's output streams.
//!
//! Readers run as separate tasks writing into shared buffers, so whatever a
//! process wrote before it was killed is still available afterwards.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Buffer {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Bytes read from one stream, capped at a limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub text: String,
    pub truncated: bool,
}

/// A running reader for one output stream.
pub(crate) struct StreamCapture {
    buffer: Arc<Mutex<Buffer>>,
    reader: Option<JoinHandle<()>>,
}

impl StreamCapture {
    /// Start reading `stream` in the background, keeping at most `limit` bytes.
    pub(crate) fn spawn<R>(stream: Option<R>, limit: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Buffer::default()));
        let reader = stream.map(|stream| {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(pump(stream, buffer, limit))
        });
        Self { buffer, reader }
    }

    /// Wait up to `timeout` for the reader to hit EOF, then take what was captured.
    pub(crate) async fn finish(mut self, timeout: Duration) -> Captured {
        if let Some(reader) = self.reader.take() {
            let abort = reader.abort_handle();
            if tokio::time::timeout(timeout, reader).await.is_err() {
                abort.abort();
            }
        }
        let buffer = self.buffer.lock();
        let bytes = if buffer.truncated {
            trim_split_char(&buffer.bytes)
        } else {
            &buffer.bytes[..]
        };
        Captured {
            text: String::from_utf8_lossy(bytes).into_owned(),
            truncated: buffer.truncated,
        }
    }
}

/// Drop a trailing multi-byte character that the cap cut in half.
fn trim_split_char(bytes: &[u8]) -> &[u8] {
    let floor = bytes.len().saturating_sub(3);
    for i in (floor..bytes.len()).rev() {
        let width = match bytes[i] {
            0x80..=0xBF => continue,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if i + width > bytes.len() { &bytes[..i] } else { bytes };
    }
    bytes
}

async fn pump<R>(mut stream: R, buffer: Arc<Mutex<Buffer>>, limit: usize)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut buffer = buffer.lock();
                let room = limit.saturating_sub(buffer.bytes.len());
                if n > room {
                    buffer.truncated = true;
                }
                let keep = n.min(room);
                buffer.bytes.extend_from_slice(&chunk[..keep]);
            }
        }
    }
}
