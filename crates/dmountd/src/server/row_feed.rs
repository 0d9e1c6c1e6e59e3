//! Plain-text row lookup endpoint.
//!
//! Each request line is `<path> <index>`; each reply line is the row as a
//! JSON array of strings, or a human-readable error. No handshake. A request
//! line longer than the frame limit is discarded up to its newline and
//! answered once with the usage message.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{
    split, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt,
    BufReader,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{bind, ServerError, MAX_FRAME_SIZE};
use crate::mounts::MountRegistry;

const USAGE: &str = "Invalid request format. Please send 'path index'.";

/// Row feed endpoint.
pub struct RowFeedServer {
    listener: TcpListener,
    registry: Arc<MountRegistry>,
    shutdown: CancellationToken,
}

impl RowFeedServer {
    /// Binds to `addr`; use port 0 for an ephemeral port.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<MountRegistry>,
        shutdown: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = bind(addr).await?;
        Ok(Self {
            listener,
            registry,
            shutdown,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Serve(e.to_string()))
    }

    /// Accepts connections until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "Row feed listening");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Row feed shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let registry = Arc::clone(&self.registry);
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) = serve(stream, registry, shutdown).await {
                                    debug!(addr = %addr, error = %e, "Row feed connection ended");
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "Failed to accept row feed connection"),
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve<S>(
    stream: S,
    registry: Arc<MountRegistry>,
    shutdown: CancellationToken,
) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, mut writer) = split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_FRAME_SIZE as u64);
        let read = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = limited.read_until(b'\n', &mut line) => read?,
        };
        if read == 0 {
            return Ok(());
        }

        let reply = if line.last() != Some(&b'\n') && line.len() >= MAX_FRAME_SIZE {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                skipped = discard_line(&mut reader) => skipped?,
            };
            USAGE.to_string()
        } else {
            answer(&registry, String::from_utf8_lossy(&line).trim()).await
        };

        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
}

/// Consumes input up to and including the next newline, without buffering it.
async fn discard_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        match buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = buf.len();
                reader.consume(len);
            }
        }
    }
}

/// Produces the reply line for one request line.
async fn answer(registry: &MountRegistry, request: &str) -> String {
    let parts: Vec<&str> = request.split(' ').collect();
    let [path, index] = parts.as_slice() else {
        return USAGE.to_string();
    };

    let Ok(index) = index.parse::<i64>() else {
        return format!("Invalid index: {index}");
    };

    match registry.get_row(path, index).await {
        Ok(row) => serde_json::to_string(&row).unwrap_or_else(|e| e.to_string()),
        Err(_) => format!("Invalid path or index: {path} {index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmount_core::Sandbox;
    use tokio::io::duplex;

    async fn registry() -> (tempfile::TempDir, MountRegistry) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "x,y\n1,2\n3,4\n").unwrap();
        let registry = MountRegistry::new(Sandbox::open(dir.path()).unwrap());
        registry.mount("a.csv").await.unwrap();
        (dir, registry)
    }

    #[tokio::test]
    async fn test_answer_row() {
        let (_dir, registry) = registry().await;
        assert_eq!(answer(&registry, "a.csv 0").await, r#"["1","2"]"#);
    }

    #[tokio::test]
    async fn test_answer_errors() {
        let (_dir, registry) = registry().await;
        assert_eq!(answer(&registry, "a.csv").await, USAGE);
        assert_eq!(answer(&registry, "a.csv 1 2").await, USAGE);
        assert_eq!(answer(&registry, "a.csv one").await, "Invalid index: one");
        assert_eq!(
            answer(&registry, "a.csv 5").await,
            "Invalid path or index: a.csv 5"
        );
        assert_eq!(
            answer(&registry, "b.csv 0").await,
            "Invalid path or index: b.csv 0"
        );
    }

    #[tokio::test]
    async fn test_overlong_line_answered_once() {
        let (_dir, registry) = registry().await;
        let (server_side, client_side) = duplex(64 * 1024);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(server_side, Arc::new(registry), shutdown));

        let (client_read, mut client_write) = split(client_side);
        let writer = tokio::spawn(async move {
            let mut request = vec![b'a'; MAX_FRAME_SIZE + 4096];
            request.push(b'\n');
            client_write.write_all(&request).await.unwrap();
            client_write.write_all(b"a.csv 1\n").await.unwrap();
            client_write.shutdown().await.unwrap();
        });

        let mut replies = Vec::new();
        let mut lines = BufReader::new(client_read).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            replies.push(line);
        }
        writer.await.unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(replies, vec![USAGE.to_string(), r#"["3","4"]"#.to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_ends_idle_connection() {
        let (_dir, registry) = registry().await;
        let (server_side, _client_side) = duplex(1024);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(server_side, Arc::new(registry), shutdown.clone()));

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
