//! Channel listener
//!
//! Accepts repeated connections on one named endpoint for the lifetime of a run.

use super::connection::{Connection, IpcError};
use super::transport::ChannelName;
use futures::Stream;
use tracing::debug;

#[cfg(unix)]
pub type ServerStream = tokio::net::UnixStream;

#[cfg(windows)]
pub type ServerStream = tokio::net::windows::named_pipe::NamedPipeServer;

/// Listening side of a channel
pub struct IpcServer {
    name: ChannelName,
    #[cfg(unix)]
    listener: tokio::net::UnixListener,
    #[cfg(windows)]
    next: tokio::net::windows::named_pipe::NamedPipeServer,
}

impl IpcServer {
    /// Bind the endpoint; an existing endpoint with the same name is an error
    #[cfg(unix)]
    pub fn bind(name: ChannelName) -> Result<Self, IpcError> {
        let path = std::path::Path::new(name.as_str());
        if path.exists() {
            return Err(IpcError::Bind {
                name: name.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    "channel already exists",
                ),
            });
        }
        let listener = tokio::net::UnixListener::bind(path).map_err(|source| IpcError::Bind {
            name: name.to_string(),
            source,
        })?;
        debug!(channel = %name, "listening");
        Ok(Self { name, listener })
    }

    /// Bind the endpoint; an existing endpoint with the same name is an error
    #[cfg(windows)]
    pub fn bind(name: ChannelName) -> Result<Self, IpcError> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(name.as_str())
            .map_err(|source| IpcError::Bind {
                name: name.to_string(),
                source,
            })?;
        debug!(channel = %name, "listening");
        Ok(Self { name, next })
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    #[cfg(unix)]
    pub async fn accept(&mut self) -> Result<Connection<ServerStream>, IpcError> {
        let (stream, _) = self.listener.accept().await?;
        debug!(channel = %self.name, "accepted connection");
        Ok(Connection::new(stream))
    }

    #[cfg(windows)]
    pub async fn accept(&mut self) -> Result<Connection<ServerStream>, IpcError> {
        use tokio::net::windows::named_pipe::ServerOptions;

        self.next.connect().await?;
        // A fresh instance must exist before the next client tries to open the pipe
        let replacement = ServerOptions::new().create(self.name.as_str())?;
        let connected = std::mem::replace(&mut self.next, replacement);
        debug!(channel = %self.name, "accepted connection");
        Ok(Connection::new(connected))
    }

    /// Stream of incoming connections
    pub fn listen(self) -> impl Stream<Item = Result<Connection<ServerStream>, IpcError>> {
        futures::stream::unfold(self, |mut server| async move {
            let next = server.accept().await;
            Some((next, server))
        })
    }
}

#[cfg(unix)]
impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(self.name.as_str());
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ipc::codec::Message;
    use crate::ipc::transport::connect;
    use crate::models::HostErrorMessage;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_accepts_repeated_connections() {
        let name = ChannelName::random();
        let server = IpcServer::bind(name.clone()).unwrap();
        let mut connections = Box::pin(server.listen());

        for i in 0..3 {
            let mut client = connect(&name).await.unwrap();
            let message = Message::Error(HostErrorMessage {
                message: format!("client {i}"),
            });
            client.send(&message).await.unwrap();

            let mut accepted = connections.next().await.unwrap().unwrap();
            assert_eq!(accepted.receive().await.unwrap(), Some(message));
        }
    }

    #[tokio::test]
    async fn test_name_collision_is_error() {
        let name = ChannelName::random();
        let _first = IpcServer::bind(name.clone()).unwrap();
        assert!(matches!(
            IpcServer::bind(name),
            Err(IpcError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn test_endpoint_removed_on_drop() {
        let name = ChannelName::random();
        let server = IpcServer::bind(name.clone()).unwrap();
        assert!(std::path::Path::new(name.as_str()).exists());
        drop(server);
        assert!(!std::path::Path::new(name.as_str()).exists());
        assert!(connect(&name).await.is_err());
    }
}
