use std::io;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::{Envelope, InboundMessage, OutboundMessage};

/// Companion end of the channel: sends commands stamped with an origin and
/// reads the host's notices
#[derive(Debug)]
pub struct CompanionClient {
    reader: BufReader<UnixStream>,
    origin: String,
}

impl CompanionClient {
    pub async fn connect(socket_path: impl AsRef<Path>, origin: impl Into<String>) -> io::Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        Ok(Self {
            reader: BufReader::new(stream),
            origin: origin.into(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub async fn send(&mut self, message: InboundMessage) -> io::Result<()> {
        let envelope = Envelope::new(self.origin.clone(), message);
        let mut json = serde_json::to_string(&envelope)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        json.push('\n');

        self.reader.get_mut().write_all(json.as_bytes()).await?;
        self.reader.get_mut().flush().await?;

        Ok(())
    }

    /// Announce the origin without asking for anything, so the host starts
    /// forwarding notices to this connection
    pub async fn hello(&mut self) -> io::Result<()> {
        self.send(InboundMessage::new("hello")).await
    }

    pub async fn recv(&mut self) -> io::Result<OutboundMessage> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;

        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "host closed connection",
            ));
        }

        serde_json::from_str(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::companion::server::CompanionServer;
    use std::time::Duration;
    use tempfile::TempDir;

    const ORIGIN: &str = "http://localhost:3000";

    fn temp_socket_path() -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("companion.sock");
        (dir, path)
    }

    #[tokio::test]
    async fn sent_commands_carry_client_origin() {
        let (_dir, path) = temp_socket_path();
        let mut server = CompanionServer::bind(&path).unwrap();

        let mut client = CompanionClient::connect(&path, ORIGIN).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        server.accept_pending().unwrap();

        client.send(InboundMessage::generate("a fox")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let envelopes = server.poll_envelopes(ORIGIN).unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].1.origin, ORIGIN);
        assert_eq!(envelopes[0].1.message.payload["generationParams"], "a fox");
    }

    #[tokio::test]
    async fn hello_makes_connection_receive_notices() {
        let (_dir, path) = temp_socket_path();
        let mut server = CompanionServer::bind(&path).unwrap();

        let mut client = CompanionClient::connect(&path, ORIGIN).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        server.accept_pending().unwrap();

        client.hello().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        server.poll_envelopes(ORIGIN).unwrap();
        server.broadcast(&OutboundMessage::ModelsRefreshed).await.unwrap();

        assert_eq!(client.recv().await.unwrap(), OutboundMessage::ModelsRefreshed);
    }

    #[tokio::test]
    async fn connect_without_host_fails() {
        let (_dir, path) = temp_socket_path();
        let err = CompanionClient::connect(&path, ORIGIN).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn recv_reports_closed_host() {
        let (_dir, path) = temp_socket_path();
        let mut server = CompanionServer::bind(&path).unwrap();

        let mut client = CompanionClient::connect(&path, ORIGIN).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        server.accept_pending().unwrap();
        drop(server);

        let err = client.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
