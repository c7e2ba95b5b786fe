//! Accept loop and process-wide server state.

use super::handler::{ConnectionHandler, SessionEnd};
use super::registry::SessionRegistry;
use crate::access::{AccessFilter, Admission};
use anyhow::{Context, Result};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

/// Everything a session needs from the server. Owned by the server and
/// shared with handlers through an `Arc`.
pub struct ServerContext {
    password: String,
    root: PathBuf,
    filter: AccessFilter,
    registry: Arc<SessionRegistry>,
}

impl ServerContext {
    pub fn new(password: impl Into<String>, root: impl Into<PathBuf>, filter: AccessFilter) -> Self {
        Self {
            password: password.into(),
            root: root.into(),
            filter,
            registry: SessionRegistry::new(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Directory every listing, upload and download is relative to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn filter(&self) -> &AccessFilter {
        &self.filter
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

impl fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContext")
            .field("password", &"REDACTED")
            .field("root", &self.root)
            .field("filter", &self.filter)
            .finish()
    }
}

pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl Server {
    /// Binding is the only step that can fail fatally.
    pub async fn bind(addr: &str, ctx: ServerContext) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {}", addr))?;
        Ok(Self::from_listener(listener, ctx))
    }

    pub fn from_listener(listener: TcpListener, ctx: ServerContext) -> Self {
        Self {
            listener,
            ctx: Arc::new(ctx),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Accept until an authenticated client stops the server, then close
    /// every remaining session and wait for all of them to finish.
    pub async fn run(self) -> Result<()> {
        let Self { listener, ctx } = self;
        info!(
            "filegated listening on {} root={}",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into()),
            ctx.root().display()
        );

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = ctx.registry().stopped() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = Arc::clone(&ctx);
                        sessions.spawn(
                            admit_and_serve(stream, peer, ctx)
                                .instrument(info_span!("session", %peer)),
                        );
                    }
                    Err(e) => warn!("accept failed: {}", e),
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        drop(listener);
        ctx.registry().shutdown();
        while sessions.join_next().await.is_some() {}
        info!("filegated stopped");
        Ok(())
    }
}

/// Bind `addr` and serve until shutdown.
pub async fn serve(addr: &str, ctx: ServerContext) -> Result<()> {
    Server::bind(addr, ctx).await?.run().await
}

async fn admit_and_serve(stream: TcpStream, peer: SocketAddr, ctx: Arc<ServerContext>) {
    let verdict = {
        let ctx = Arc::clone(&ctx);
        tokio::task::spawn_blocking(move || ctx.filter().decide(peer.ip())).await
    };
    let verdict = verdict.unwrap_or_else(|e| {
        warn!("access check did not complete: {}", e);
        Admission::Admit
    });
    if verdict == Admission::Reject {
        info!("connection refused by access filter");
        return;
    }

    let Some(guard) = ctx.registry().register() else {
        debug!("server stopping, dropping connection");
        return;
    };
    info!("accepted connection");
    let _ = stream.set_nodelay(true);
    let (rd, wr) = stream.into_split();
    let handler = ConnectionHandler::new(
        BufReader::new(rd),
        BufWriter::new(wr),
        Arc::clone(&ctx),
        guard.token().clone(),
    );
    let end = handler.run().await;
    match end {
        SessionEnd::Transport => debug!("session ended on transport error"),
        end => info!(?end, "session closed"),
    }
    drop(guard);
}
