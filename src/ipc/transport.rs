//! Local transport endpoints
//!
//! Unix domain sockets on Unix, named pipes on Windows.

use super::connection::{Connection, IpcError};
use std::fmt;

#[cfg(unix)]
pub type ClientStream = tokio::net::UnixStream;

#[cfg(windows)]
pub type ClientStream = tokio::net::windows::named_pipe::NamedPipeClient;

/// Name of a local channel endpoint
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Fresh name derived from a random 128-bit token
    pub fn random() -> Self {
        let token = format!("{:032x}", rand::random::<u128>());
        Self::from_token(&token)
    }

    #[cfg(unix)]
    fn from_token(token: &str) -> Self {
        let path = std::env::temp_dir().join(format!("testmux-{token}.sock"));
        Self(path.to_string_lossy().into_owned())
    }

    #[cfg(windows)]
    fn from_token(token: &str) -> Self {
        Self(format!(r"\\.\pipe\testmux-{token}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connect to a listening channel as a client
#[cfg(unix)]
pub async fn connect(name: &ChannelName) -> Result<Connection<ClientStream>, IpcError> {
    let stream = tokio::net::UnixStream::connect(name.as_str())
        .await
        .map_err(|source| IpcError::Connect {
            name: name.to_string(),
            source,
        })?;
    Ok(Connection::new(stream))
}

/// Connect to a listening channel as a client
#[cfg(windows)]
pub async fn connect(name: &ChannelName) -> Result<Connection<ClientStream>, IpcError> {
    use std::time::Duration;
    use tokio::net::windows::named_pipe::ClientOptions;

    const ERROR_PIPE_BUSY: i32 = 231;

    loop {
        match ClientOptions::new().open(name.as_str()) {
            Ok(client) => return Ok(Connection::new(client)),
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(source) => {
                return Err(IpcError::Connect {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }
}
