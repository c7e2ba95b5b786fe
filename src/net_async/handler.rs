//! Per-connection command loop.

use super::server::ServerContext;
use crate::protocol::Command;
use crate::protocol_core::{
    expect_line, find_regular_file, is_plain_file_name, list_directory, listing_line,
    parse_count, read_line, write_line, write_status, TransferredFile,
};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent ClientDisconnect.
    ClientExit,
    /// Client closed the stream without saying goodbye.
    PeerClosed,
    /// This session's authenticated client stopped the server.
    ServerShutdown,
    /// Another session stopped the server.
    ForceClosed,
    /// The stream broke mid-request.
    Transport,
}

enum Flow {
    Continue,
    Disconnect,
    Closed,
    Shutdown,
}

/// Serves one client: reads a command line, runs it, replies, repeats.
pub struct ConnectionHandler<R, W> {
    reader: R,
    writer: W,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
    authenticated: bool,
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, ctx: Arc<ServerContext>, cancel: CancellationToken) -> Self {
        Self {
            reader,
            writer,
            ctx,
            cancel,
            authenticated: false,
        }
    }

    /// Run until the client leaves, the stream breaks or the session is
    /// cancelled. The stream is closed before this returns; after an
    /// authenticated shutdown the rest of the server is stopped last.
    pub async fn run(mut self) -> SessionEnd {
        let cancel = self.cancel.clone();
        let end = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::ForceClosed,
                step = self.step() => match step {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Disconnect) => break SessionEnd::ClientExit,
                    Ok(Flow::Closed) => break SessionEnd::PeerClosed,
                    Ok(Flow::Shutdown) => break SessionEnd::ServerShutdown,
                    Err(e) => {
                        debug!("session transport error: {}", e);
                        break SessionEnd::Transport;
                    }
                },
            }
        };

        let Self {
            reader,
            writer,
            ctx,
            ..
        } = self;
        drop(reader);
        drop(writer);

        if end == SessionEnd::ServerShutdown {
            ctx.registry().shutdown();
        }
        end
    }

    async fn step(&mut self) -> io::Result<Flow> {
        let Some(line) = read_line(&mut self.reader).await? else {
            return Ok(Flow::Closed);
        };
        let Some(command) = Command::parse_line(&line) else {
            trace!("ignoring malformed command line {:?}", line);
            return Ok(Flow::Continue);
        };
        debug!(%command, authenticated = self.authenticated, "dispatch");

        let flow = match command {
            Command::Authenticate => self.authenticate().await?,
            Command::ClientDisconnect => return Ok(Flow::Disconnect),
            Command::ServerShutdown => self.server_shutdown().await?,
            Command::ListDirectory => self.list_directory().await?,
            Command::UploadFile => self.upload_file().await?,
            Command::DownloadFile => self.download_file().await?,
        };
        self.writer.flush().await?;
        Ok(flow)
    }

    async fn authenticate(&mut self) -> io::Result<Flow> {
        let offered = expect_line(&mut self.reader).await?;
        if offered == self.ctx.password() {
            self.authenticated = true;
            info!("client authenticated");
            write_status(&mut self.writer, true).await?;
        } else {
            info!("authentication failed");
            write_status(&mut self.writer, false).await?;
        }
        Ok(Flow::Continue)
    }

    async fn server_shutdown(&mut self) -> io::Result<Flow> {
        if !self.authenticated {
            info!("shutdown denied: not authenticated");
            write_status(&mut self.writer, false).await?;
            return Ok(Flow::Continue);
        }
        write_status(&mut self.writer, true).await?;
        Ok(Flow::Shutdown)
    }

    async fn list_directory(&mut self) -> io::Result<Flow> {
        if !self.authenticated {
            write_status(&mut self.writer, false).await?;
            return Ok(Flow::Continue);
        }
        match list_directory(self.ctx.root()).await {
            Ok(names) => {
                write_status(&mut self.writer, true).await?;
                write_line(&mut self.writer, &listing_line(&names)).await?;
            }
            Err(e) => {
                warn!("cannot list {}: {}", self.ctx.root().display(), e);
                write_status(&mut self.writer, false).await?;
            }
        }
        Ok(Flow::Continue)
    }

    /// An unauthenticated upload is refused at the first reply; the client
    /// sends no body in that case.
    async fn upload_file(&mut self) -> io::Result<Flow> {
        if !self.authenticated {
            write_status(&mut self.writer, false).await?;
            return Ok(Flow::Continue);
        }
        write_status(&mut self.writer, true).await?;
        self.writer.flush().await?;

        let name = expect_line(&mut self.reader).await?;
        let count_line = expect_line(&mut self.reader).await?;
        let Some(count) = parse_count(&count_line) else {
            warn!("upload {:?}: bad line count {:?}", name, count_line);
            write_status(&mut self.writer, false).await?;
            return Ok(Flow::Continue);
        };
        let file = TransferredFile::read_body(&mut self.reader, count).await?;

        if !is_plain_file_name(&name) {
            warn!("upload refused: {:?} is not a plain file name", name);
            write_status(&mut self.writer, false).await?;
            return Ok(Flow::Continue);
        }
        let target = self.ctx.root().join(&name);
        let ok = match tokio::fs::write(&target, file.to_text()).await {
            Ok(()) => {
                info!(lines = count, "stored {}", target.display());
                true
            }
            Err(e) => {
                warn!("cannot write {}: {}", target.display(), e);
                false
            }
        };
        write_status(&mut self.writer, ok).await?;
        Ok(Flow::Continue)
    }

    async fn download_file(&mut self) -> io::Result<Flow> {
        let name = expect_line(&mut self.reader).await?;
        if !self.authenticated {
            write_status(&mut self.writer, false).await?;
            return Ok(Flow::Continue);
        }

        let path = match find_regular_file(self.ctx.root(), &name).await {
            Ok(Some(path)) => path,
            Ok(None) => {
                debug!("download {:?}: no such file", name);
                write_status(&mut self.writer, false).await?;
                return Ok(Flow::Continue);
            }
            Err(e) => {
                warn!("download {:?}: {}", name, e);
                write_status(&mut self.writer, false).await?;
                return Ok(Flow::Continue);
            }
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("cannot read {}: {}", path.display(), e);
                write_status(&mut self.writer, false).await?;
                return Ok(Flow::Continue);
            }
        };

        let file = TransferredFile::from_text(&String::from_utf8_lossy(&bytes));
        write_status(&mut self.writer, true).await?;
        file.write_to(&mut self.writer).await?;
        info!(lines = file.line_count(), "sent {}", path.display());
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessFilter;
    use tempfile::TempDir;
    use tokio::io::{duplex, split, AsyncBufReadExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    struct Harness {
        to_server: WriteHalf<DuplexStream>,
        from_server: BufReader<ReadHalf<DuplexStream>>,
        session: JoinHandle<SessionEnd>,
        ctx: Arc<ServerContext>,
        _root: TempDir,
    }

    impl Harness {
        fn start() -> Self {
            let root = TempDir::new().unwrap();
            let ctx = Arc::new(ServerContext::new(
                "hello",
                root.path(),
                AccessFilter::allow_all(),
            ));
            let (client, server) = duplex(64 * 1024);
            let (srv_rd, srv_wr) = split(server);
            let (cli_rd, cli_wr) = split(client);
            let guard = ctx.registry().register().unwrap();
            let handler = ConnectionHandler::new(
                BufReader::new(srv_rd),
                srv_wr,
                Arc::clone(&ctx),
                guard.token().clone(),
            );
            let session = tokio::spawn(async move {
                let end = handler.run().await;
                drop(guard);
                end
            });
            Self {
                to_server: cli_wr,
                from_server: BufReader::new(cli_rd),
                session,
                ctx,
                _root: root,
            }
        }

        async fn send(&mut self, lines: &[&str]) {
            for line in lines {
                write_line(&mut self.to_server, line).await.unwrap();
            }
            self.to_server.flush().await.unwrap();
        }

        async fn recv(&mut self) -> String {
            expect_line(&mut self.from_server).await.unwrap()
        }

        fn root(&self) -> &std::path::Path {
            self.ctx.root()
        }
    }

    #[tokio::test]
    async fn wrong_then_right_password() {
        let mut h = Harness::start();
        h.send(&["0", "nope"]).await;
        assert_eq!(h.recv().await, "0");
        h.send(&["3"]).await;
        assert_eq!(h.recv().await, "0");
        h.send(&["0", "hello"]).await;
        assert_eq!(h.recv().await, "1");
        h.send(&["0", "hello"]).await;
        assert_eq!(h.recv().await, "1");
        h.send(&["0", "wrong"]).await;
        assert_eq!(h.recv().await, "0");
        // A failed retry does not revoke the session's authentication
        h.send(&["3"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "");
    }

    #[tokio::test]
    async fn malformed_commands_are_ignored() {
        let mut h = Harness::start();
        h.send(&["garbage", "", "99", "0", "hello"]).await;
        assert_eq!(h.recv().await, "1");
    }

    #[tokio::test]
    async fn privileged_commands_need_authentication() {
        let mut h = Harness::start();
        std::fs::write(h.root().join("secret.txt"), "s\n").unwrap();

        h.send(&["4"]).await;
        assert_eq!(h.recv().await, "0");
        h.send(&["5", "secret.txt"]).await;
        assert_eq!(h.recv().await, "0");
        h.send(&["2"]).await;
        assert_eq!(h.recv().await, "0");
        assert!(h.ctx.registry().is_running());

        // Nothing was written by the refused upload
        let names = list_directory(h.root()).await.unwrap();
        assert_eq!(names, ["secret.txt"]);
    }

    #[tokio::test]
    async fn upload_then_download() {
        let mut h = Harness::start();
        h.send(&["0", "hello", "4"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "1");
        h.send(&["a.txt", "3", "x", "y", "z"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(std::fs::read_to_string(h.root().join("a.txt")).unwrap(), "x\ny\nz\n");

        h.send(&["5", "a.txt"]).await;
        assert_eq!(h.recv().await, "1");
        let file = TransferredFile::read_from(&mut h.from_server).await.unwrap();
        assert_eq!(file.to_text(), "x\ny\nz\n");
    }

    #[tokio::test]
    async fn upload_rejects_nested_names_but_consumes_body() {
        let mut h = Harness::start();
        h.send(&["0", "hello", "4"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "1");
        h.send(&["../escape.txt", "2", "3", "5"]).await;
        assert_eq!(h.recv().await, "0");
        // Body lines that look like commands were not dispatched
        h.send(&["3"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "");
    }

    #[tokio::test]
    async fn upload_write_failure_replies_zero() {
        let mut h = Harness::start();
        std::fs::create_dir(h.root().join("sub")).unwrap();
        h.send(&["0", "hello", "4"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "1");
        // Writing over a directory fails after the body is read
        h.send(&["sub", "1", "x"]).await;
        assert_eq!(h.recv().await, "0");
        assert!(h.root().join("sub").is_dir());

        h.send(&["3"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "sub");
    }

    #[tokio::test]
    async fn upload_with_bad_line_count_replies_zero() {
        let mut h = Harness::start();
        h.send(&["0", "hello", "4"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "1");
        h.send(&["b.txt", "notanumber"]).await;
        assert_eq!(h.recv().await, "0");
        assert!(!h.root().join("b.txt").exists());

        // Next line is read as a command again
        h.send(&["3"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "");
    }

    #[tokio::test]
    async fn download_misses_directories_and_unknown_names() {
        let mut h = Harness::start();
        std::fs::create_dir(h.root().join("sub")).unwrap();
        h.send(&["0", "hello", "5", "sub", "5", "missing"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "0");
        assert_eq!(h.recv().await, "0");
    }

    #[tokio::test]
    async fn listing_is_one_line() {
        let mut h = Harness::start();
        std::fs::write(h.root().join("b"), "").unwrap();
        std::fs::write(h.root().join("a"), "").unwrap();
        std::fs::create_dir(h.root().join("dir")).unwrap();
        h.send(&["0", "hello", "3"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "a b dir");
    }

    #[tokio::test]
    async fn client_disconnect_ends_session_without_reply() {
        let mut h = Harness::start();
        h.send(&["1"]).await;
        assert_eq!(h.session.await.unwrap(), SessionEnd::ClientExit);
        let mut rest = String::new();
        let n = h.from_server.read_line(&mut rest).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn authenticated_shutdown_stops_registry() {
        let mut h = Harness::start();
        let bystander = h.ctx.registry().register().unwrap();
        h.send(&["0", "hello", "2"]).await;
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.recv().await, "1");
        assert_eq!(h.session.await.unwrap(), SessionEnd::ServerShutdown);
        assert!(!h.ctx.registry().is_running());
        assert!(bystander.token().is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_session_is_force_closed() {
        let h = Harness::start();
        h.ctx.registry().shutdown();
        assert_eq!(h.session.await.unwrap(), SessionEnd::ForceClosed);
    }
}
