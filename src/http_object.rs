use bytes::Bytes;
use url::form_urlencoded;

use crate::http_status::HttpStatus;

/// One parsed HTTP/1.1 request.
///
/// `path` is percent-decoded up to the first `?`; the query string after it
/// is kept exactly as the client sent it. `headers` are the raw header lines
/// in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<String>,
    pub length: usize,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>, version: impl Into<String>) -> Self {
        HttpRequest {
            method: method.into(),
            path: path.into(),
            version: version.into(),
            headers: Vec::new(),
            length: 0,
            body: None,
        }
    }

    /// First header whose key matches `key` case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.iter().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case(key) {
                Some(value.trim())
            } else {
                None
            }
        })
    }

    pub fn wants_keep_alive(&self) -> bool {
        self.header("Connection")
            .map(|v| v.eq_ignore_ascii_case("keep-alive"))
            .unwrap_or(false)
    }

    /// Path without the query string.
    pub fn route_path(&self) -> &str {
        match self.path.split_once('?') {
            Some((path, _)) => path,
            None => self.path.as_str(),
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.path.split_once('?').map(|(_, query)| query)
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body.as_ref().and_then(|b| std::str::from_utf8(b).ok())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub mime_type: String,
    pub body: Bytes,
}

/// A response to serialize. A MIME type and a body always travel together,
/// so a response without content is written with `Content-Length: 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    status_code: HttpStatus,
    content: Option<Content>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        HttpResponse { status_code: HttpStatus::OK, content: None }
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status_code(status_code: HttpStatus) -> Self {
        HttpResponse { status_code, ..Self::default() }
    }

    pub fn with_body(status_code: HttpStatus, mime_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        HttpResponse {
            status_code,
            content: Some(Content { mime_type: mime_type.into(), body: body.into() }),
        }
    }

    pub fn html(body: String) -> Self {
        Self::with_body(HttpStatus::OK, "text/html", body)
    }

    pub fn text(status_code: HttpStatus, message: impl Into<String>) -> Self {
        Self::with_body(status_code, "text/plain", message.into())
    }

    pub fn set_status_code(&mut self, status_code: HttpStatus) {
        self.status_code = status_code;
    }

    pub fn get_status_code(&self) -> HttpStatus {
        self.status_code
    }

    pub fn content(&self) -> Option<&Content> {
        self.content.as_ref()
    }
}
