//! Bodies exchanged between workers and the coordinator.
//!
//! ```text
//! worker_info: ['Palo Alto', (37.44, -122.14)]
//! rtt_times: [0.101, 0.098, 0.120]
//! ip: 142.250.80.36
//! ```
//!
//! A registration carries only the `worker_info` line. The coordinator
//! answers a dispatch by writing the bare target URL and `\n` to the
//! worker's connection.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const WORKER_INFO: &str = "worker_info";
pub const RTT_TIMES: &str = "rtt_times";
pub const IP: &str = "ip";

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("missing '{0}' field")]
    MissingField(&'static str),

    #[error("invalid worker_info '{0}'")]
    InvalidWorkerInfo(String),

    #[error("invalid coordinates '{0}'")]
    InvalidCoordinates(String),

    #[error("invalid rtt sample '{0}'")]
    InvalidRtt(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Coordinates { latitude, longitude }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// Accepts `37.44,-122.14` as well as the tuple form `(37.44, -122.14)`.
impl FromStr for Coordinates {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidCoordinates(s.to_string());
        let inner = s.trim();
        let inner = inner
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(inner);

        let (lat, lon) = inner.split_once(',').ok_or_else(invalid)?;
        let latitude: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let longitude: f64 = lon.trim().parse().map_err(|_| invalid())?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(invalid());
        }
        Ok(Coordinates { latitude, longitude })
    }
}

/// What a worker says about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerInfo {
    pub location: String,
    pub coords: Coordinates,
}

impl WorkerInfo {
    pub fn new(location: impl Into<String>, coords: Coordinates) -> Self {
        WorkerInfo { location: location.into(), coords }
    }

    /// `['Palo Alto', (37.44, -122.14)]`
    pub fn encode(&self) -> String {
        let quote = if self.location.contains('\'') { '"' } else { '\'' };
        format!("[{q}{}{q}, {}]", self.location, self.coords, q = quote)
    }

    pub fn decode(value: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidWorkerInfo(value.to_string());

        let start = value.find(|c: char| c == '\'' || c == '"').ok_or_else(invalid)?;
        let quote = value[start..].chars().next().ok_or_else(invalid)?;
        let rest = &value[start + 1..];
        let end = rest.find(quote).ok_or_else(invalid)?;
        let location = rest[..end].trim();
        if location.is_empty() {
            return Err(invalid());
        }

        let after = &rest[end + 1..];
        let open = after.find('(').ok_or_else(invalid)?;
        let close = after[open..].find(')').ok_or_else(invalid)? + open;
        let coords = after[open..=close].parse()?;

        Ok(WorkerInfo::new(location, coords))
    }
}

/// One worker's measurements for the target it was last sent.
#[derive(Debug, Clone, PartialEq)]
pub struct RttReport {
    pub info: WorkerInfo,
    pub samples: Vec<f64>,
    pub ip: String,
}

impl RttReport {
    /// Arithmetic mean; `None` when there are no samples.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn encode(&self) -> String {
        let samples: Vec<String> = self.samples.iter().map(|s| s.to_string()).collect();
        format!(
            "{}: {}\r\n{}: [{}]\r\n{}: {}\r\n",
            WORKER_INFO,
            self.info.encode(),
            RTT_TIMES,
            samples.join(", "),
            IP,
            self.ip
        )
    }

    pub fn decode(body: &str) -> Result<Self, ProtocolError> {
        let info = WorkerInfo::decode(field(body, WORKER_INFO)?)?;
        let samples = decode_samples(field(body, RTT_TIMES)?)?;
        let ip = field(body, IP)?.to_string();
        if ip.is_empty() {
            return Err(ProtocolError::MissingField(IP));
        }
        Ok(RttReport { info, samples, ip })
    }
}

pub fn encode_registration(info: &WorkerInfo) -> String {
    format!("{}: {}\r\n", WORKER_INFO, info.encode())
}

pub fn decode_registration(body: &str) -> Result<WorkerInfo, ProtocolError> {
    WorkerInfo::decode(field(body, WORKER_INFO)?)
}

/// Value of the first `name: value` line. Line endings may be CRLF or LF.
fn field<'a>(body: &'a str, name: &'static str) -> Result<&'a str, ProtocolError> {
    body.lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == name).then(|| value.trim())
        })
        .ok_or(ProtocolError::MissingField(name))
}

fn decode_samples(value: &str) -> Result<Vec<f64>, ProtocolError> {
    let inner = value
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| ProtocolError::InvalidRtt(value.to_string()))?;

    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match s.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
            _ => Err(ProtocolError::InvalidRtt(s.to_string())),
        })
        .collect()
}
