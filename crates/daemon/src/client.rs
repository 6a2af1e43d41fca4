//! Client for talking to a running `wardend` over TCP.
//!
//! Requests are sent one at a time and answered in order; each call waits for
//! the response carrying its sequence number.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use protocol::messages::{
    FileDeleteRequest, FileDeleteResponse, FileDownloadRequest, FileListRequest,
    FileListResponse, FileUploadRequest, FileUploadResponse, LoginRequest, LoginResponse,
    LogoutRequest, Ping, RegisterRequest, RegisterResponse,
};
use protocol::{Envelope, ErrorCode, ErrorMessage, Message, ProtocolError};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;

use crate::transport::FramedStream;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors returned by [`FileClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server answered with an error message.
    #[error("server returned {:?}: {}", .0.code, .0.message)]
    Server(ErrorMessage),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),
}

impl ClientError {
    /// Error code sent by the server, if this is a server error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Server(e) => Some(e.code),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Protocol(err.into())
    }
}

/// A downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub filename: String,
    pub data: Vec<u8>,
}

/// A client connection to the daemon.
pub struct FileClient {
    framed: FramedStream<TcpStream>,
    sequence: u64,
    timeout: Duration,
}

impl FileClient {
    /// Connect to the daemon at `addr`.
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        Self::connect_with_timeout(addr, Duration::from_secs(DEFAULT_TIMEOUT_SECS)).await
    }

    /// Connect with a custom timeout, used for the connect and every request.
    pub async fn connect_with_timeout(
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::Timeout(format!("connecting to {addr}")))??;
        stream.set_nodelay(true)?;

        Ok(Self {
            framed: FramedStream::new(stream),
            sequence: 0,
            timeout,
        })
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request and wait for its response.
    ///
    /// An `Error` response is returned as [`ClientError::Server`].
    pub async fn request(&mut self, message: Message) -> Result<Message, ClientError> {
        tokio::time::timeout(self.timeout, self.request_internal(message))
            .await
            .map_err(|_| ProtocolError::Timeout("waiting for response".to_string()))?
    }

    async fn request_internal(&mut self, message: Message) -> Result<Message, ClientError> {
        self.sequence += 1;
        let sequence = self.sequence;
        self.framed
            .write_envelope(&Envelope::new(sequence, message))
            .await?;

        loop {
            let envelope = self
                .framed
                .read_envelope()
                .await?
                .ok_or_else(|| {
                    ProtocolError::ConnectionClosed("server closed the connection".to_string())
                })?;

            if envelope.sequence != sequence {
                match envelope.payload {
                    // Sequence 0 is used for errors about undecodable input.
                    Message::Error(e) if envelope.sequence == 0 => {
                        return Err(ClientError::Server(e))
                    }
                    _ => continue,
                }
            }

            return match envelope.payload {
                Message::Error(e) => Err(ClientError::Server(e)),
                payload => Ok(payload),
            };
        }
    }

    pub async fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ClientError> {
        let request = Message::Login(LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        });
        match self.request(request).await? {
            Message::LoginResponse(resp) => Ok(resp),
            _ => Err(ClientError::UnexpectedResponse("expected login response")),
        }
    }

    /// End the session. Returns whether one was open.
    pub async fn logout(&mut self) -> Result<bool, ClientError> {
        match self.request(Message::Logout(LogoutRequest {})).await? {
            Message::LogoutResponse(resp) => Ok(resp.was_logged_in),
            _ => Err(ClientError::UnexpectedResponse("expected logout response")),
        }
    }

    /// Create an account. Requires an admin session.
    pub async fn register(
        &mut self,
        username: &str,
        password: &str,
        is_admin: bool,
    ) -> Result<RegisterResponse, ClientError> {
        let request = Message::Register(RegisterRequest {
            username: username.to_string(),
            password: password.to_string(),
            is_admin,
        });
        match self.request(request).await? {
            Message::RegisterResponse(resp) => Ok(resp),
            _ => Err(ClientError::UnexpectedResponse("expected register response")),
        }
    }

    /// List a directory. `entries` is `None` when it does not exist.
    pub async fn list(&mut self, path: &str) -> Result<FileListResponse, ClientError> {
        let request = Message::FileListRequest(FileListRequest {
            path: path.to_string(),
        });
        match self.request(request).await? {
            Message::FileListResponse(resp) => Ok(resp),
            _ => Err(ClientError::UnexpectedResponse("expected file list response")),
        }
    }

    /// Download a whole file, chunk by chunk.
    pub async fn download(&mut self, path: &str) -> Result<Download, ClientError> {
        let mut data = Vec::new();
        loop {
            let request = Message::FileDownloadRequest(FileDownloadRequest {
                path: path.to_string(),
                offset: data.len() as u64,
                chunk_size: 0,
            });
            let chunk = match self.request(request).await? {
                Message::FileDownloadChunk(chunk) => chunk,
                _ => return Err(ClientError::UnexpectedResponse("expected file chunk")),
            };

            if data.is_empty() {
                data.reserve(chunk.total_size as usize);
            }
            data.extend_from_slice(&chunk.data);

            if chunk.is_last {
                return Ok(Download {
                    filename: chunk.filename,
                    data,
                });
            }
            if chunk.data.is_empty() {
                return Err(ClientError::UnexpectedResponse("empty chunk before end of file"));
            }
        }
    }

    /// Upload `data` as `filename` into the directory `dir`.
    ///
    /// A SHA-256 checksum is sent along so the server can verify the bytes.
    pub async fn upload(
        &mut self,
        dir: &str,
        filename: &str,
        data: Vec<u8>,
    ) -> Result<FileUploadResponse, ClientError> {
        let checksum = hex::encode(Sha256::digest(&data));
        let request = Message::FileUploadRequest(FileUploadRequest {
            path: dir.to_string(),
            filename: filename.to_string(),
            data,
            checksum: Some(checksum),
        });
        match self.request(request).await? {
            Message::FileUploadResponse(resp) => Ok(resp),
            _ => Err(ClientError::UnexpectedResponse("expected upload response")),
        }
    }

    /// Delete a file or directory tree.
    pub async fn delete(&mut self, path: &str) -> Result<FileDeleteResponse, ClientError> {
        let request = Message::FileDeleteRequest(FileDeleteRequest {
            path: path.to_string(),
        });
        match self.request(request).await? {
            Message::FileDeleteResponse(resp) => Ok(resp),
            _ => Err(ClientError::UnexpectedResponse("expected delete response")),
        }
    }

    /// Check the daemon is responsive.
    pub async fn ping(&mut self) -> Result<bool, ClientError> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let response = self
            .request(Message::Ping(Ping {
                timestamp,
                payload: Vec::new(),
            }))
            .await?;
        Ok(matches!(response, Message::Pong(pong) if pong.timestamp == timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_fails_when_daemon_not_running() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(FileClient::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_server_error_is_surfaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = FramedStream::new(stream);
            let request = framed.read_envelope().await.unwrap().unwrap();
            let error = ErrorMessage {
                code: ErrorCode::Unauthorized,
                message: "not authenticated".to_string(),
                context: None,
                recoverable: false,
            };
            framed
                .write_envelope(&Envelope::new(request.sequence, Message::Error(error)))
                .await
                .unwrap();
        });

        let mut client = FileClient::connect(addr).await.unwrap();
        let err = client.list("/").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Unauthorized));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(stream);
        });

        let mut client = FileClient::connect_with_timeout(addr, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(matches!(
            client.ping().await,
            Err(ClientError::Protocol(ProtocolError::Timeout(_)))
        ));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_hangup_is_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = FramedStream::new(stream);
            framed.read_envelope().await.unwrap().unwrap();
        });

        let mut client = FileClient::connect(addr).await.unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::ConnectionClosed(_))
        ));
        assert_eq!(err.code(), None);

        server.await.unwrap();
    }
}
