use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::PipelineError;
use crate::config::PipelineConfig;
use crate::connection::ConnectionPipeline;
use crate::publisher::LogPublisher;
use crate::validate::Validator;

// ═══════════════════════════════════════════════════════════════
//  Transport
// ═══════════════════════════════════════════════════════════════

/// An accepted byte stream and a printable name for its peer.
pub struct Connection {
    pub peer: String,
    pub stream: Box<dyn AsyncRead + Send + Unpin>,
}

impl Connection {
    pub fn new(peer: impl Into<String>, stream: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            peer: peer.into(),
            stream: Box::new(stream),
        }
    }
}

/// Source of inbound connections.
///
/// `Ok(None)` means the transport is gone for good and the accept loop
/// should stop. Errors are treated as temporary.
pub trait Acceptor: Send {
    fn accept(&mut self) -> Pin<Box<dyn Future<Output = io::Result<Option<Connection>>> + Send + '_>>;
}

pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub async fn bind(addr: &str) -> Result<Self, PipelineError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, PipelineError> {
        Ok(self.listener.local_addr()?)
    }
}

impl Acceptor for TcpAcceptor {
    fn accept(&mut self) -> Pin<Box<dyn Future<Output = io::Result<Option<Connection>>> + Send + '_>> {
        Box::pin(async move {
            let (stream, addr) = self.listener.accept().await?;
            Ok(Some(Connection::new(addr.to_string(), stream)))
        })
    }
}

/// In-process transport: every connection sent on the channel is accepted.
/// The loop stops once all senders are dropped.
impl Acceptor for mpsc::Receiver<Connection> {
    fn accept(&mut self) -> Pin<Box<dyn Future<Output = io::Result<Option<Connection>>> + Send + '_>> {
        Box::pin(async move { Ok(self.recv().await) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Source task: acceptor → one pipeline task per connection
// ═══════════════════════════════════════════════════════════════

const ACCEPT_RETRY: Duration = Duration::from_secs(1);

/// Accept connections until the transport closes or `token` fires, running
/// a [`ConnectionPipeline`] for each on its own task.
///
/// The returned task finishes after every connection task it spawned has
/// finished, so awaiting it drains the source. Aborting it aborts the
/// connection tasks as well.
pub fn spawn_source<A>(
    mut acceptor: A,
    publisher: Arc<LogPublisher>,
    config: Arc<PipelineConfig>,
    token: CancellationToken,
) -> JoinHandle<()>
where
    A: Acceptor + 'static,
{
    tokio::spawn(async move {
        let mut connections = JoinSet::new();

        loop {
            let accepted = tokio::select! {
                r = acceptor.accept() => r,
                Some(done) = connections.join_next(), if !connections.is_empty() => {
                    log_connection_end(done);
                    continue;
                }
                _ = token.cancelled() => break,
            };

            match accepted {
                Ok(Some(conn)) => {
                    tracing::info!(peer = %conn.peer, "new connection");
                    let pipeline =
                        ConnectionPipeline::new(conn.peer, publisher.clone(), Validator::new(), &config);
                    let token = token.clone();
                    connections.spawn(async move {
                        pipeline.run(conn.stream, &token).await;
                    });
                }
                Ok(None) => {
                    tracing::info!("transport closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept error");
                    tokio::select! {
                        _ = tokio::time::sleep(ACCEPT_RETRY) => {}
                        _ = token.cancelled() => break,
                    }
                }
            }
        }

        tracing::info!(open = connections.len(), "accept loop stopped, draining connections");
        while let Some(done) = connections.join_next().await {
            log_connection_end(done);
        }
        tracing::info!("source finished");
    })
}

fn log_connection_end(done: Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        tracing::error!(error = %e, "connection task failed");
    }
}
