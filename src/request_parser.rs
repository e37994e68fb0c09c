use thiserror::Error;
use tokio::io::AsyncRead;

use crate::framer::{FrameError, Framer};
use crate::http_object::HttpRequest;
use crate::http_status::HttpStatus;

pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
pub const DEFAULT_MAX_BODY: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum RequestError {
    /// Peer went away before a complete request arrived.
    #[error("connection closed before a complete request ({buffered} bytes buffered)")]
    Closed { buffered: usize },

    #[error(transparent)]
    Transport(FrameError),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

impl From<FrameError> for RequestError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::EndOfStream { buffered } => RequestError::Closed { buffered },
            FrameError::FrameTooLarge { limit } => {
                RequestError::Malformed(format!("request head exceeds {} bytes", limit))
            }
            other => RequestError::Transport(other),
        }
    }
}

impl RequestError {
    /// The reply owed to the client, if the connection is still usable for one.
    pub fn to_response(&self) -> Option<crate::http_object::HttpResponse> {
        use crate::http_object::HttpResponse;
        match self {
            RequestError::Malformed(reason) => Some(HttpResponse::text(
                HttpStatus::BadRequest,
                format!("Your request is malformed: {}", reason),
            )),
            RequestError::Unsupported(what) => Some(HttpResponse::text(
                HttpStatus::LengthRequired,
                format!("Your request uses {}, sorry!", what),
            )),
            RequestError::Closed { .. } | RequestError::Transport(_) => None,
        }
    }
}

/// Request head and body reader for one connection.
#[derive(Debug, Clone, Copy)]
pub struct RequestParser {
    max_body: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        RequestParser { max_body: DEFAULT_MAX_BODY }
    }
}

impl RequestParser {
    pub fn new(max_body: usize) -> Self {
        RequestParser { max_body }
    }

    pub async fn read_request<R>(&self, framer: &mut Framer<R>) -> Result<HttpRequest, RequestError>
    where
        R: AsyncRead + Unpin,
    {
        let head = framer.read_until(HEAD_TERMINATOR).await?;
        let mut req = self.parse_head(&head)?;

        if req.header("Content-Length").is_some() {
            let body = framer.read_exactly(req.length).await?;
            req.body = Some(body);
        }
        Ok(req)
    }

    /// Parses the request-line and headers. The body is left for the caller;
    /// `length` carries the declared `Content-Length`.
    pub fn parse_head(&self, head: &[u8]) -> Result<HttpRequest, RequestError> {
        let head = std::str::from_utf8(head)
            .map_err(|_| RequestError::Malformed("request head is not UTF-8".to_string()))?;

        let mut lines = head.split("\r\n");
        let request_line = match lines.next() {
            Some(line) if !line.trim().is_empty() => line,
            _ => return Err(RequestError::Malformed("missing request-line".to_string())),
        };

        let (method, raw_path, version) = parse_request_line(request_line)?;
        let mut req = HttpRequest::new(method, decode_path(raw_path), version);
        req.headers = lines.filter(|l| !l.is_empty()).map(str::to_string).collect();

        // Chunked bodies are not supported.
        if req
            .header("Transfer-Encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false)
        {
            return Err(RequestError::Unsupported("chunked transfer encoding"));
        }

        if let Some(value) = req.header("Content-Length") {
            let length = value
                .parse::<usize>()
                .map_err(|_| RequestError::Malformed(format!("invalid Content-Length '{}'", value)))?;
            if length > self.max_body {
                return Err(RequestError::Malformed(format!(
                    "body of {} bytes exceeds the {} byte limit",
                    length, self.max_body
                )));
            }
            req.length = length;
        }

        Ok(req)
    }
}

fn parse_request_line(line: &str) -> Result<(&str, &str, &str), RequestError> {
    let mut it = line.split_whitespace();
    match (it.next(), it.next(), it.next(), it.next()) {
        (Some(m), Some(p), Some(v), None) => Ok((m, p, v)),
        _ => Err(RequestError::Malformed(format!("request-line '{}' needs exactly 3 tokens", line))),
    }
}

/// Percent-decodes the path component only; the query is re-attached verbatim.
fn decode_path(raw: &str) -> String {
    let (path, query) = match raw.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (raw, None),
    };

    let decoded = urlencoding::decode_binary(path.as_bytes());
    let decoded = String::from_utf8_lossy(&decoded);
    match query {
        Some(query) => format!("{}?{}", decoded, query),
        None => decoded.into_owned(),
    }
}
