use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::spawn;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{serve_connection, ConnectionSettings};
use crate::dispatcher::Dispatcher;
use crate::http_connection_context::ConnectionId;
use crate::registry::WorkerRegistry;
use crate::static_files::StaticFiles;
use crate::stats::Statistics;

pub const DEFAULT_PORT: u16 = 8080;

pub struct ServerBuilder {
    host: Option<String>,
    port: Option<u16>,
    web_root: Option<PathBuf>,
    settings: ConnectionSettings,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        ServerBuilder::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        ServerBuilder { host: None, port: None, web_root: None, settings: ConnectionSettings::default() }
    }

    pub fn host(&mut self, host: impl Into<String>) -> &mut Self {
        self.host.replace(host.into());
        self
    }

    pub fn port(&mut self, port: u16) -> &mut Self {
        self.port.replace(port);
        self
    }

    pub fn web_root(&mut self, web_root: impl Into<PathBuf>) -> &mut Self {
        self.web_root.replace(web_root.into());
        self
    }

    pub fn connection_settings(&mut self, settings: ConnectionSettings) -> &mut Self {
        self.settings = settings;
        self
    }

    pub fn build(&mut self) -> Server {
        let registry = Arc::new(WorkerRegistry::new());
        let web_root = self.web_root.take().unwrap_or_else(|| PathBuf::from("web_files"));

        Server {
            host: self.host.take().unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            dispatcher: Arc::new(Dispatcher::new(Arc::clone(&registry), StaticFiles::new(web_root))),
            registry,
            stats: Arc::new(Statistics::new()),
            settings: self.settings.clone(),
            next_id: AtomicU64::new(1),
        }
    }
}

pub struct Server {
    host: String,
    port: u16,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<WorkerRegistry>,
    stats: Arc<Statistics>,
    settings: ConnectionSettings,
    next_id: AtomicU64,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = format!("{}:{}", self.host, self.port);
        TcpListener::bind(&addr)
            .await
            .with_context(|| format!("cannot listen on {}", addr))
    }

    /// Binds the configured address and serves until `shutdown` fires.
    pub async fn serve(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve_on(listener, shutdown).await
    }

    pub async fn serve_on(&self, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "coordinator listening");
        let mut incoming = TcpListenerStream::new(listener);

        loop {
            let tcp_stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = incoming.next() => match next {
                    Some(Ok(tcp_stream)) => tcp_stream,
                    Some(Err(e)) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                    None => break,
                },
            };

            let peer = match tcp_stream.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    debug!(error = %e, "peer vanished before its connection was served");
                    continue;
                }
            };

            let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
            // Each task owns clones of the shared state, which keeps it 'static.
            spawn(serve_connection(
                tcp_stream,
                peer,
                id,
                Arc::clone(&self.dispatcher),
                Arc::clone(&self.stats),
                self.settings.clone(),
            ));
        }

        info!(addr = %local_addr, "coordinator stopped accepting connections");
        Ok(())
    }
}
