use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mailq_common::{Message, internal};
use tokio::fs;

use super::Transport;
use crate::error::TransportError;

/// Drops each message as an `.eml` file into a pickup directory
///
/// Files are written under a temporary name and renamed into place, so a
/// pickup process never sees half a message.
#[derive(Debug, Clone)]
pub struct DirectoryTransport {
    path: PathBuf,
    connected: bool,
}

impl DirectoryTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            connected: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Transport for DirectoryTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        fs::create_dir_all(&self.path).await?;
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::ConnectionClosed);
        }

        let name = ulid::Ulid::new().to_string();
        let temp = self.path.join(format!(".tmp_{name}.eml"));
        let target = self.path.join(format!("{name}.eml"));

        fs::write(&temp, &*message.body).await?;
        fs::rename(&temp, &target).await?;

        internal!(level = DEBUG, "Wrote message to {}", target.display());

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_one_file_per_message() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut transport = DirectoryTransport::new(dir.path().join("pickup"));

        let message = Message::new("a@test.test", ["b@test.test"], "Hi", b"raw body".as_slice());
        assert!(matches!(
            transport.send(&message).await,
            Err(TransportError::ConnectionClosed)
        ));

        transport.open().await.expect("open");
        transport.send(&message).await.expect("send");
        transport.send(&message).await.expect("send");

        let files: Vec<_> = std::fs::read_dir(transport.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .collect();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.extension().is_some_and(|e| e == "eml")));
        assert_eq!(std::fs::read(&files[0]).expect("read"), b"raw body");
    }
}
