use std::fmt::Write;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::http_object::HttpResponse;
use crate::stats::Statistics;

pub const SERVER_NAME: &str = "geolocate";

#[derive(Debug, Error)]
#[error("connection writer has shut down")]
pub struct WriterClosed;

/// RFC 1123 date, always in GMT.
pub fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

// HTTP/1.1 200 OK
// Server: geolocate
// Date: Sun, 06 Nov 1994 08:49:37 GMT
// Content-Type: text/html
// Content-Length: 14
// Connection: keep-alive
//
// <html>...</html>
pub fn encode_response(res: &HttpResponse, keep_alive: bool, date: &str) -> BytesMut {
    let mut head = String::with_capacity(256);
    // Writing into a String cannot fail.
    let _ = write!(head, "HTTP/1.1 {}\r\n", res.get_status_code());
    let _ = write!(head, "Server: {}\r\n", SERVER_NAME);
    let _ = write!(head, "Date: {}\r\n", date);

    match res.content() {
        None => head.push_str("Content-Length: 0\r\n"),
        Some(content) => {
            let _ = write!(head, "Content-Type: {}\r\n", content.mime_type);
            let _ = write!(head, "Content-Length: {}\r\n", content.body.len());
            let connection = if keep_alive { "keep-alive" } else { "close" };
            let _ = write!(head, "Connection: {}\r\n", connection);
        }
    }
    head.push_str("\r\n");

    let body_len = res.content().map(|c| c.body.len()).unwrap_or(0);
    let mut buf = BytesMut::with_capacity(head.len() + body_len);
    buf.put_slice(head.as_bytes());
    if let Some(content) = res.content() {
        buf.put_slice(&content.body);
    }
    buf
}

/// Serializes responses onto a connection's outbound queue.
///
/// The queue is drained by the connection's writer task, which also carries
/// dispatch lines for registered workers, so each response stays contiguous
/// on the wire.
#[derive(Debug, Clone)]
pub struct ResponseWriter {
    outbound: mpsc::Sender<Bytes>,
    stats: Arc<Statistics>,
}

impl ResponseWriter {
    pub fn new(outbound: mpsc::Sender<Bytes>, stats: Arc<Statistics>) -> Self {
        ResponseWriter { outbound, stats }
    }

    pub async fn send(&self, res: HttpResponse, keep_alive: bool) -> Result<(), WriterClosed> {
        let status = res.get_status_code();
        if !status.is_success() {
            self.stats.record_error();
        }

        let bytes = encode_response(&res, keep_alive, &http_date(Utc::now()));
        debug!(%status, bytes = bytes.len(), keep_alive, "sending response");
        self.outbound.send(bytes.freeze()).await.map_err(|_| WriterClosed)
    }
}
