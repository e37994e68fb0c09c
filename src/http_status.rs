use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpStatus {
    // 2XX
    OK = 200,

    // 4XX
    BadRequest = 400,
    Forbidden = 403,
    NotFound = 404,
    MethodNotAllowed = 405,
    LengthRequired = 411,
}

impl HttpStatus {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn reason(self) -> &'static str {
        match self {
            HttpStatus::OK => "OK",
            HttpStatus::BadRequest => "BAD REQUEST",
            HttpStatus::Forbidden => "FORBIDDEN",
            HttpStatus::NotFound => "NOT FOUND",
            HttpStatus::MethodNotAllowed => "METHOD NOT ALLOWED",
            HttpStatus::LengthRequired => "LENGTH REQUIRED",
        }
    }

    pub fn is_success(self) -> bool {
        self == HttpStatus::OK
    }
}

impl From<HttpStatus> for u16 {
    fn from(value: HttpStatus) -> Self {
        value.code()
    }
}

// Status-line token, e.g. "404 NOT FOUND".
impl fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}
