use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::framer::{FrameError, Framer};
use crate::protocol::{encode_registration, RttReport, WorkerInfo};
use crate::request_parser::HEAD_TERMINATOR;

pub const DEFAULT_SAMPLES: usize = 5;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `host:port` of the coordinator.
    pub coordinator: String,
    pub info: WorkerInfo,
    pub samples: usize,
    pub fetch_timeout: Duration,
}

/// One keep-alive request as the worker sends it to the coordinator.
pub fn encode_request(path: &str, host: &str, body: &str) -> String {
    format!(
        "POST {} HTTP/1.1\r\nHost: {}\r\nConnection: keep-alive\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        path,
        host,
        body.len(),
        body
    )
}

/// Registers with the coordinator, then measures every target it pushes
/// until the coordinator hangs up or `shutdown` fires.
pub async fn run(config: WorkerConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let stream = TcpStream::connect(&config.coordinator)
        .await
        .with_context(|| format!("cannot reach coordinator at {}", config.coordinator))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut framer = Framer::new(read_half);

    let registration = encode_request("/register_worker", &config.coordinator, &encode_registration(&config.info));
    write_half.write_all(registration.as_bytes()).await?;
    info!(coordinator = %config.coordinator, location = %config.info.location, "registered with coordinator");

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = next_target(&mut framer) => next?,
        };
        let Some(target) = next else {
            info!(coordinator = %config.coordinator, "coordinator closed the connection");
            break;
        };

        match measure_rtt(&target, config.samples, config.fetch_timeout).await {
            Ok((ip, samples)) => {
                let report = RttReport { info: config.info.clone(), samples, ip };
                info!(%target, ip = %report.ip, mean = report.mean().unwrap_or_default(), "reporting rtt");
                let request = encode_request("/rtt-time", &config.coordinator, &report.encode());
                write_half.write_all(request.as_bytes()).await?;
            }
            Err(e) => warn!(%target, error = %e, "measurement failed"),
        }
    }

    write_half.shutdown().await?;
    Ok(())
}

/// Next dispatched URL, skipping the coordinator's replies to our own
/// requests. `None` once the coordinator closes.
async fn next_target<R>(framer: &mut Framer<R>) -> anyhow::Result<Option<String>>
where
    R: AsyncRead + Unpin,
{
    loop {
        let line = match framer.read_until(b"\n").await {
            Ok(line) => line,
            Err(FrameError::EndOfStream { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let line = String::from_utf8_lossy(&line).trim().to_string();

        if line.starts_with("HTTP/") {
            skip_response(framer, &line).await?;
        } else if !line.is_empty() {
            return Ok(Some(line));
        }
    }
}

async fn skip_response<R>(framer: &mut Framer<R>, status_line: &str) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    let headers = framer.read_until(HEAD_TERMINATOR).await?;
    let headers = String::from_utf8_lossy(&headers);
    let length = headers
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("Content-Length"))
        .map(|(_, value)| value.trim().parse::<usize>())
        .transpose()
        .context("coordinator sent a bad Content-Length")?
        .unwrap_or(0);

    framer.read_exactly(length).await?;
    debug!(status = %status_line, length, "skipped coordinator response");
    Ok(())
}

/// Resolves the target's host and times `samples` fetches of it, each from
/// connect to the first response line. Returns the resolved IP and the
/// samples in seconds.
pub async fn measure_rtt(target: &str, samples: usize, fetch_timeout: Duration) -> anyhow::Result<(String, Vec<f64>)> {
    let url = Url::parse(target).with_context(|| format!("invalid target '{}'", target))?;
    if url.scheme() != "http" {
        bail!("only http targets are supported, got '{}'", url.scheme());
    }
    let host = url.host_str().context("target has no host")?;
    let port = url.port_or_known_default().unwrap_or(80);

    let addr = lookup_host((host, port))
        .await
        .with_context(|| format!("cannot resolve {}", host))?
        .next()
        .with_context(|| format!("{} resolved to no address", host))?;

    let host_header = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let path = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    let request = format!("GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", path, host_header);

    let mut rtts = Vec::with_capacity(samples);
    for _ in 0..samples {
        let started = Instant::now();
        timeout(fetch_timeout, fetch_first_line(addr, &request))
            .await
            .map_err(|_| anyhow!("no reply from {} within {:?}", addr, fetch_timeout))??;
        rtts.push(started.elapsed().as_secs_f64());
    }
    Ok((addr.ip().to_string(), rtts))
}

async fn fetch_first_line(addr: SocketAddr, request: &str) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(request.as_bytes()).await?;

    let mut framer = Framer::new(stream);
    let line = framer.read_until(b"\n").await?;
    if !line.starts_with(b"HTTP/") {
        bail!("{} did not answer with HTTP", addr);
    }
    Ok(())
}
