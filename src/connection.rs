use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::framer::{FrameError, Framer, DEFAULT_MAX_FRAME};
use crate::http_connection_context::{ConnectionContext, ConnectionId};
use crate::registry::WorkerRegistry;
use crate::request_parser::{RequestError, RequestParser, DEFAULT_MAX_BODY};
use crate::response_writer::ResponseWriter;
use crate::stats::Statistics;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// `None` waits forever for the next byte.
    pub read_timeout: Option<Duration>,
    pub max_head_bytes: usize,
    pub max_body_bytes: usize,
    pub outbound_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            max_head_bytes: DEFAULT_MAX_FRAME,
            max_body_bytes: DEFAULT_MAX_BODY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Drives one accepted socket until it closes.
///
/// The read half feeds the request loop. The write half belongs to a
/// separate task draining the connection's outbound queue, which is also
/// where dispatch lines land once the peer registers as a worker.
pub async fn serve_connection(
    tcp_stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<Statistics>,
    settings: ConnectionSettings,
) {
    let (read_half, write_half) = tcp_stream.into_split();
    let (tx, rx) = mpsc::channel(settings.outbound_capacity);
    let writer_task = tokio::spawn(drain_outbound(rx, BufWriter::new(write_half), id));

    let ctx = ConnectionContext::new(id, peer, tx);
    ConnectionOwner::new(ctx, read_half, dispatcher, stats, settings).run().await;

    // Every sender is gone by now, so the writer flushes what is queued and
    // shuts the socket down.
    if let Err(e) = writer_task.await {
        warn!(%id, error = %e, "connection writer task failed");
    }
}

async fn drain_outbound(mut rx: mpsc::Receiver<Bytes>, mut writer: BufWriter<OwnedWriteHalf>, id: ConnectionId) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = write_and_flush(&mut writer, &bytes).await {
            debug!(%id, error = %e, "peer stopped accepting writes");
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(%id, error = %e, "socket shutdown failed");
    }
}

async fn write_and_flush(writer: &mut BufWriter<OwnedWriteHalf>, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

enum Cycle {
    Responded,
    Closed,
}

/// Releases everything a connection holds, on whatever path it ends.
struct ConnectionGuard {
    id: ConnectionId,
    peer: SocketAddr,
    stats: Arc<Statistics>,
    registry: Arc<WorkerRegistry>,
}

impl ConnectionGuard {
    fn open(id: ConnectionId, peer: SocketAddr, stats: Arc<Statistics>, registry: Arc<WorkerRegistry>) -> Self {
        stats.record_connection_opened();
        ConnectionGuard { id, peer, stats, registry }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.record_connection_closed();
        if let Some(worker) = self.registry.remove(self.id) {
            info!(id = %self.id, location = %worker.location, "worker left");
        }

        let s = self.stats.snapshot();
        info!(
            id = %self.id,
            peer = %self.peer,
            active = s.active_connections,
            total = s.total_connections,
            requests = s.num_requests,
            errors = s.num_errors,
            avg_ms = s.avg_time().as_secs_f64() * 1000.0,
            max_ms = s.max_time.as_secs_f64() * 1000.0,
            "connection closed"
        );
    }
}

pub struct ConnectionOwner<R> {
    ctx: ConnectionContext,
    framer: Framer<R>,
    parser: RequestParser,
    writer: ResponseWriter,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<Statistics>,
    num_requests: u64,
    keep_alive: bool,
    _guard: ConnectionGuard,
}

impl<R> ConnectionOwner<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(
        ctx: ConnectionContext,
        reader: R,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<Statistics>,
        settings: ConnectionSettings,
    ) -> Self {
        let guard = ConnectionGuard::open(ctx.id, ctx.peer, Arc::clone(&stats), Arc::clone(dispatcher.registry()));
        debug!(id = %ctx.id, peer = %ctx.peer, "connection opened");

        ConnectionOwner {
            framer: Framer::with_limits(reader, settings.read_timeout, settings.max_head_bytes),
            parser: RequestParser::new(settings.max_body_bytes),
            writer: ResponseWriter::new(ctx.outbound.clone(), Arc::clone(&stats)),
            ctx,
            dispatcher,
            stats,
            num_requests: 0,
            keep_alive: false,
            _guard: guard,
        }
    }

    /// Serves requests until keep-alive lapses or the peer goes away.
    /// Dropping `self` at the end releases the connection.
    pub async fn run(mut self) {
        loop {
            self.keep_alive = false;
            let started = Instant::now();

            match self.handle_one().await {
                Cycle::Responded => {
                    self.num_requests += 1;
                    self.stats.record_request(started.elapsed());
                }
                Cycle::Closed => break,
            }

            if !self.keep_alive {
                break;
            }
        }
        debug!(id = %self.ctx.id, requests = self.num_requests, "request loop finished");
    }

    async fn handle_one(&mut self) -> Cycle {
        let req = match self.parser.read_request(&mut self.framer).await {
            Ok(req) => req,
            Err(RequestError::Closed { buffered }) => {
                debug!(id = %self.ctx.id, buffered, "peer closed the connection");
                return Cycle::Closed;
            }
            Err(RequestError::Transport(FrameError::TimedOut(after))) => {
                debug!(id = %self.ctx.id, ?after, "connection idle, closing");
                return Cycle::Closed;
            }
            Err(RequestError::Transport(e)) => {
                warn!(id = %self.ctx.id, peer = %self.ctx.peer, error = %e, "transport failure");
                return Cycle::Closed;
            }
            Err(e) => {
                warn!(id = %self.ctx.id, peer = %self.ctx.peer, error = %e, "rejecting request");
                return match e.to_response() {
                    Some(res) => self.respond(res).await,
                    None => Cycle::Closed,
                };
            }
        };

        self.keep_alive = req.wants_keep_alive();
        let res = self.dispatcher.dispatch(&req, &self.ctx).await;
        info!(
            id = %self.ctx.id,
            method = %req.method,
            path = %req.path,
            status = res.get_status_code().code(),
            "request handled"
        );

        // Workers sit idle between dispatches.
        if self.framer.read_timeout().is_some() && self.dispatcher.registry().contains(self.ctx.id) {
            self.framer.set_read_timeout(None);
            debug!(id = %self.ctx.id, "read timeout lifted for worker connection");
        }

        self.respond(res).await
    }

    async fn respond(&mut self, res: crate::http_object::HttpResponse) -> Cycle {
        match self.writer.send(res, self.keep_alive).await {
            Ok(()) => Cycle::Responded,
            Err(e) => {
                debug!(id = %self.ctx.id, error = %e, "response dropped");
                self.keep_alive = false;
                Cycle::Closed
            }
        }
    }
}
