use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::task::{Context, Poll};

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};

use super::protocol::{Envelope, OutboundMessage};

/// Unique identifier for a companion connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Buffered companion connection state
struct CompanionConnection {
    stream: UnixStream,
    /// Raw bytes up to the next newline; decoded per complete line
    buffer: Vec<u8>,
    /// Set once the connection has sent an envelope from the allowed origin
    trusted: bool,
}

impl CompanionConnection {
    fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            trusted: false,
        }
    }
}

/// Socket end of the companion channel.
///
/// Reads are non-blocking so the bridge pump can drain everything that is
/// available on each tick; writes only ever go to trusted connections.
pub struct CompanionServer {
    listener: UnixListener,
    connections: HashMap<ConnectionId, CompanionConnection>,
    socket_path: PathBuf,
    next_conn_id: u64,
}

impl CompanionServer {
    /// Bind to the given socket path, removing any stale socket file first.
    pub fn bind(socket_path: impl AsRef<Path>) -> io::Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        let listener = UnixListener::bind(&socket_path)?;

        Ok(Self {
            listener,
            connections: HashMap::new(),
            socket_path,
            next_conn_id: 0,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept any pending new connections (non-blocking).
    /// Returns the number of new connections accepted.
    pub fn accept_pending(&mut self) -> io::Result<usize> {
        let mut accepted = 0;
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());

        loop {
            match self.listener.poll_accept(&mut cx) {
                Poll::Ready(Ok((stream, _addr))) => {
                    let conn_id = ConnectionId::new(self.next_conn_id);
                    self.next_conn_id += 1;
                    self.connections
                        .insert(conn_id, CompanionConnection::new(stream));
                    accepted += 1;
                }
                Poll::Ready(Err(e)) => return Err(e),
                Poll::Pending => break,
            }
        }

        Ok(accepted)
    }

    /// Drain complete envelopes from every connection (non-blocking).
    ///
    /// Envelopes whose origin differs from `allowed_origin` are dropped and
    /// logged; a connection becomes trusted the first time it sends one that
    /// matches. Disconnected companions are removed.
    pub fn poll_envelopes(&mut self, allowed_origin: &str) -> io::Result<Vec<(ConnectionId, Envelope)>> {
        let mut envelopes = Vec::new();
        let mut disconnected = Vec::new();

        for (&conn_id, conn) in &mut self.connections {
            let mut buf = [0u8; 4096];
            loop {
                match conn.stream.try_read(&mut buf) {
                    Ok(0) => {
                        disconnected.push(conn_id);
                        break;
                    }
                    Ok(n) => conn.buffer.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(_) => {
                        disconnected.push(conn_id);
                        break;
                    }
                }
            }

            while let Some(newline_pos) = conn.buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = conn.buffer.drain(..=newline_pos).collect();
                let line = match std::str::from_utf8(&raw) {
                    Ok(line) => line.trim(),
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring companion line that is not UTF-8");
                        continue;
                    }
                };
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<Envelope>(line) {
                    Ok(envelope) if envelope.origin == allowed_origin => {
                        conn.trusted = true;
                        envelopes.push((conn_id, envelope));
                    }
                    Ok(envelope) => {
                        tracing::warn!(
                            origin = %envelope.origin,
                            allowed = allowed_origin,
                            "dropping companion message from foreign origin"
                        );
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring malformed companion line");
                    }
                }
            }
        }

        for conn_id in disconnected {
            self.connections.remove(&conn_id);
        }

        Ok(envelopes)
    }

    /// Write a message to every trusted connection. Connections that fail
    /// to accept the write are dropped. Returns how many received it.
    pub async fn broadcast(&mut self, message: &OutboundMessage) -> io::Result<usize> {
        let mut json = serde_json::to_string(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        json.push('\n');

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (&conn_id, conn) in &mut self.connections {
            if !conn.trusted {
                continue;
            }
            let written = async {
                conn.stream.write_all(json.as_bytes()).await?;
                conn.stream.flush().await
            }
            .await;
            match written {
                Ok(()) => delivered += 1,
                Err(_) => failed.push(conn_id),
            }
        }

        for conn_id in failed {
            self.connections.remove(&conn_id);
        }

        Ok(delivered)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_trusted(&self, conn_id: ConnectionId) -> bool {
        self.connections
            .get(&conn_id)
            .is_some_and(|conn| conn.trusted)
    }

    pub fn cleanup(&self) -> io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        Ok(())
    }
}

impl Drop for CompanionServer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}
