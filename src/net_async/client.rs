//! Client side of the filegate protocol.
//!
//! Every method sends one request and maps the server's reply onto an
//! [`Outcome`]. Transport problems (no connection, broken stream, replies
//! that are not part of the protocol) surface as [`ClientError`].

use crate::protocol::Command;
use crate::protocol_core::{
    expect_line, fits_on_one_line, read_status, write_line, TransferredFile,
};
use std::io;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Result of a client request. Each operation has its own failure case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    CannotConnect,
    AuthenticationFailed,
    DirectoryListing(String),
    DirectoryProblem,
    TerminationRequestDenied,
    CannotSendFile,
    CannotReceiveFile,
    FileContent(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Outcome::Ok | Outcome::DirectoryListing(_) | Outcome::FileContent(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not connected to a server")]
    NotConnected,
    #[error("server closed the connection")]
    ConnectionClosed,
    #[error("malformed reply from server: {0}")]
    Protocol(String),
    #[error("Io error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ClientError::ConnectionClosed,
            io::ErrorKind::InvalidData => ClientError::Protocol(e.to_string()),
            _ => ClientError::Io(e),
        }
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl Connection {
    async fn send(&mut self, command: Command, params: &[&str]) -> io::Result<()> {
        write_line(&mut self.writer, &command.code().to_string()).await?;
        for param in params {
            write_line(&mut self.writer, param).await?;
        }
        self.writer.flush().await
    }

    async fn authenticate(&mut self, password: &str) -> io::Result<Outcome> {
        self.send(Command::Authenticate, &[password]).await?;
        Ok(if read_status(&mut self.reader).await? {
            Outcome::Ok
        } else {
            Outcome::AuthenticationFailed
        })
    }

    async fn server_shutdown(&mut self) -> io::Result<Outcome> {
        self.send(Command::ServerShutdown, &[]).await?;
        Ok(if read_status(&mut self.reader).await? {
            Outcome::Ok
        } else {
            Outcome::TerminationRequestDenied
        })
    }

    async fn list_directory(&mut self) -> io::Result<Outcome> {
        self.send(Command::ListDirectory, &[]).await?;
        if !read_status(&mut self.reader).await? {
            return Ok(Outcome::DirectoryProblem);
        }
        Ok(Outcome::DirectoryListing(expect_line(&mut self.reader).await?))
    }

    async fn upload(&mut self, name: &str, file: &TransferredFile) -> io::Result<Outcome> {
        self.send(Command::UploadFile, &[]).await?;
        if !read_status(&mut self.reader).await? {
            // Refused up front: the server expects no body
            return Ok(Outcome::CannotSendFile);
        }
        write_line(&mut self.writer, name).await?;
        file.write_to(&mut self.writer).await?;
        self.writer.flush().await?;
        Ok(if read_status(&mut self.reader).await? {
            Outcome::Ok
        } else {
            Outcome::CannotSendFile
        })
    }

    async fn download(&mut self, name: &str) -> io::Result<Outcome> {
        self.send(Command::DownloadFile, &[name]).await?;
        if !read_status(&mut self.reader).await? {
            return Ok(Outcome::CannotReceiveFile);
        }
        let file = TransferredFile::read_from(&mut self.reader).await?;
        Ok(Outcome::FileContent(file.to_text()))
    }
}

pub struct Client {
    host: String,
    port: u16,
    conn: Option<Connection>,
}

impl Client {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            conn: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Open the connection. A server that refuses us through its access
    /// filter accepts and then closes silently, so that case only shows up
    /// as [`ClientError::ConnectionClosed`] on the first request.
    pub async fn connect(&mut self) -> Outcome {
        match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                let (rd, wr) = stream.into_split();
                self.conn = Some(Connection {
                    reader: BufReader::new(rd),
                    writer: BufWriter::new(wr),
                });
                Outcome::Ok
            }
            Err(e) => {
                debug!("connect {}:{} failed: {}", self.host, self.port, e);
                Outcome::CannotConnect
            }
        }
    }

    /// A password with a line break cannot be sent and fails locally.
    pub async fn send_password(&mut self, password: &str) -> Result<Outcome, ClientError> {
        let conn = self.conn()?;
        if !fits_on_one_line(password) {
            return Ok(Outcome::AuthenticationFailed);
        }
        let result = conn.authenticate(password).await;
        self.settle(result)
    }

    /// Tell the server we are leaving and drop the connection. Works whether
    /// or not the session authenticated; the server does not reply.
    pub async fn client_exit(&mut self) -> Result<(), ClientError> {
        let result = self.conn()?.send(Command::ClientDisconnect, &[]).await;
        self.conn = None;
        result.map_err(ClientError::from)
    }

    /// Ask the server to stop. On success the connection is closed as well.
    pub async fn server_exit(&mut self) -> Result<Outcome, ClientError> {
        let result = self.conn()?.server_shutdown().await;
        let outcome = self.settle(result)?;
        if outcome == Outcome::Ok {
            self.conn = None;
        }
        Ok(outcome)
    }

    pub async fn list_directory(&mut self) -> Result<Outcome, ClientError> {
        let result = self.conn()?.list_directory().await;
        self.settle(result)
    }

    /// Store `content` on the server as `name`. Lines may end in `\n` or
    /// `\r\n`; the server writes each with a `\n`.
    ///
    /// `name` must be a bare file name: the server refuses anything with a
    /// path separator (`dir/x.txt`, `../x.txt`) with [`Outcome::CannotSendFile`].
    /// A name with a line break is refused here without sending anything.
    pub async fn send_file(&mut self, name: &str, content: &str) -> Result<Outcome, ClientError> {
        let conn = self.conn()?;
        if !fits_on_one_line(name) {
            return Ok(Outcome::CannotSendFile);
        }
        let file = TransferredFile::from_text(content);
        let result = conn.upload(name, &file).await;
        self.settle(result)
    }

    pub async fn receive_file(&mut self, name: &str) -> Result<Outcome, ClientError> {
        let conn = self.conn()?;
        if !fits_on_one_line(name) {
            return Ok(Outcome::CannotReceiveFile);
        }
        let result = conn.download(name).await;
        self.settle(result)
    }

    /// Drop the connection without notifying the server.
    pub fn close(&mut self) {
        self.conn = None;
    }

    fn conn(&mut self) -> Result<&mut Connection, ClientError> {
        self.conn.as_mut().ok_or(ClientError::NotConnected)
    }

    /// Forget a connection that can no longer be trusted to be in step.
    fn settle(&mut self, result: io::Result<Outcome>) -> Result<Outcome, ClientError> {
        result.map_err(|e| {
            self.conn = None;
            ClientError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_need_a_connection() {
        let mut client = Client::new("127.0.0.1", 1);
        assert!(matches!(
            client.send_password("x").await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(
            client.list_directory().await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn connect_failure_is_an_outcome() {
        // Grab a free port, then close it so nothing listens there
        let port = {
            let sock = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            sock.local_addr().unwrap().port()
        };
        let mut client = Client::new("127.0.0.1", port);
        assert_eq!(client.connect().await, Outcome::CannotConnect);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn close_forgets_the_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut client = Client::new("127.0.0.1", port);
        assert_eq!(client.connect().await, Outcome::Ok);
        assert!(client.is_connected());

        client.close();
        assert!(!client.is_connected());
        assert!(matches!(
            client.receive_file("a.txt").await,
            Err(ClientError::NotConnected)
        ));
    }

    #[test]
    fn io_errors_map_to_client_errors() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(ClientError::from(eof), ClientError::ConnectionClosed));
        let bad = io::Error::new(io::ErrorKind::InvalidData, "bad");
        assert!(matches!(ClientError::from(bad), ClientError::Protocol(_)));
        let other = io::Error::new(io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(ClientError::from(other), ClientError::Io(_)));
    }

    #[test]
    fn success_outcomes() {
        assert!(Outcome::Ok.is_success());
        assert!(Outcome::FileContent(String::new()).is_success());
        assert!(!Outcome::CannotSendFile.is_success());
        assert!(!Outcome::TerminationRequestDenied.is_success());
    }
}
