use rand::Rng;
use tracing::{debug, info, warn};

use crate::estimator::estimate;
use crate::http_connection_context::ConnectionContext;
use crate::http_object::{HttpRequest, HttpResponse};
use crate::http_status::HttpStatus;
use crate::pages;
use crate::protocol::{decode_registration, RttReport};
use crate::registry::{RegistryError, WorkerRegistry};
use crate::static_files::{StaticFileError, StaticFiles};

pub fn random_color() -> String {
    let rgb: u32 = rand::thread_rng().gen_range(0..=0xFF_FFFF);
    format!("#{:06X}", rgb)
}

// GET /hello, GET /hello?name=...
pub fn hello(req: &HttpRequest) -> HttpResponse {
    let name = req.query_param("name").unwrap_or_default();
    HttpResponse::html(pages::hello_page(&random_color(), &name))
}

// GET /, GET /index
pub fn index() -> HttpResponse {
    HttpResponse::html(pages::index_page())
}

/// Sends the target to every worker, then renders whatever measurements the
/// registry holds right now. Reports for this target arrive later on the
/// workers' own connections.
pub fn analyze(req: &HttpRequest, registry: &WorkerRegistry) -> HttpResponse {
    // A target spanning lines would break the one-line dispatch message.
    let target = req
        .query_param("target")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && !t.contains(|c: char| c == '\r' || c == '\n'));

    let dispatched = match &target {
        Some(url) => {
            let n = registry.dispatch(url);
            info!(target = %url, workers = n, "dispatched analyze request");
            n
        }
        None => 0,
    };

    let workers = registry.snapshot();
    let best = estimate(&workers);
    HttpResponse::html(pages::analyze_page(target.as_deref(), dispatched, &workers, best))
}

pub fn register_worker(req: &HttpRequest, ctx: &ConnectionContext, registry: &WorkerRegistry) -> HttpResponse {
    let Some(body) = req.body_text() else {
        return HttpResponse::text(HttpStatus::BadRequest, "Registration needs a worker_info body");
    };

    let worker_info = match decode_registration(body) {
        Ok(info) => info,
        Err(e) => {
            warn!(peer = %ctx.peer, error = %e, "rejected worker registration");
            return HttpResponse::text(HttpStatus::BadRequest, format!("Bad registration: {}", e));
        }
    };

    let location = worker_info.location.clone();
    match registry.register(ctx.id, ctx.outbound.clone(), worker_info) {
        Ok(()) => info!(id = %ctx.id, peer = %ctx.peer, %location, "worker joined"),
        Err(RegistryError::AlreadyRegistered(id)) => debug!(%id, "duplicate registration ignored"),
        Err(e) => warn!(error = %e, "registration failed"),
    }
    HttpResponse::text(HttpStatus::OK, "acknowledged")
}

/// Reports are attributed to the worker registered on this connection; the
/// location label in the body is informational only.
pub fn rtt_time(req: &HttpRequest, ctx: &ConnectionContext, registry: &WorkerRegistry) -> HttpResponse {
    let report = req
        .body_text()
        .ok_or_else(|| "missing body".to_string())
        .and_then(|body| RttReport::decode(body).map_err(|e| e.to_string()));

    match report {
        Ok(report) => match registry.record_rtt(ctx.id, &report) {
            Ok(avg) => info!(id = %ctx.id, location = %report.info.location, ip = %report.ip, avg, "rtt recorded"),
            Err(e) => warn!(id = %ctx.id, error = %e, "rtt report ignored"),
        },
        Err(e) => warn!(peer = %ctx.peer, error = %e, "undecodable rtt report ignored"),
    }
    HttpResponse::html(pages::rtt_ack_page())
}

pub async fn static_file(req: &HttpRequest, files: &StaticFiles) -> HttpResponse {
    let path = req.route_path();
    match files.load(path).await {
        Ok((bytes, mime_type)) => HttpResponse::with_body(HttpStatus::OK, mime_type, bytes),
        Err(StaticFileError::NotFound(p)) => {
            debug!(path = %p, "file was not found");
            HttpResponse::text(HttpStatus::NotFound, format!("No such file: {}", p))
        }
        Err(StaticFileError::Forbidden(p, e)) => {
            warn!(path = %p, error = %e, "error reading file");
            HttpResponse::text(HttpStatus::Forbidden, format!("Permission denied: {}", p))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_connection_context::ConnectionId;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn ctx(id: u64) -> (ConnectionContext, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionContext::new(ConnectionId(id), "127.0.0.1:9000".parse().unwrap(), tx), rx)
    }

    fn request(path: &str, body: Option<&str>) -> HttpRequest {
        let mut req = HttpRequest::new("GET", path, "HTTP/1.1");
        if let Some(body) = body {
            req.length = body.len();
            req.body = Some(Bytes::from(body.to_string()));
        }
        req
    }

    fn body_of(res: &HttpResponse) -> String {
        String::from_utf8(res.content().unwrap().body.to_vec()).unwrap()
    }

    #[test]
    fn random_color_is_hex_triplet() {
        let color = random_color();
        assert_eq!(color.len(), 7);
        assert!(color.starts_with('#'));
        assert!(color[1..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hello_without_name_is_blank() {
        let res = hello(&request("/hello", None));
        assert!(body_of(&res).contains("Hello , hit page refresh"));
        let res = hello(&request("/hello?name=Ada", None));
        assert!(body_of(&res).contains("Hello Ada,"));
    }

    #[test]
    fn registration_needs_worker_info() {
        let registry = WorkerRegistry::new();
        let (ctx, _rx) = ctx(1);

        let res = register_worker(&request("/register_worker", Some("hello")), &ctx, &registry);
        assert_eq!(res.get_status_code(), HttpStatus::BadRequest);
        let res = register_worker(&request("/register_worker", None), &ctx, &registry);
        assert_eq!(res.get_status_code(), HttpStatus::BadRequest);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn register_report_analyze_flow() {
        let registry = WorkerRegistry::new();
        let (worker_ctx, mut worker_rx) = ctx(1);

        let res = register_worker(
            &request("/register_worker", Some("worker_info: ['London', (51.5, -0.12)]\r\n")),
            &worker_ctx,
            &registry,
        );
        assert_eq!(res.get_status_code(), HttpStatus::OK);

        let page = body_of(&analyze(&request("/analyze?target=http%3A%2F%2Fwww.example.com%2F", None), &registry));
        assert!(page.contains("to 1 of 1 workers"));
        assert!(page.contains("No RTT measurements yet"));
        assert_eq!(&worker_rx.recv().await.unwrap()[..], b"http://www.example.com/\n");

        let body = "worker_info: ['London', (51.5, -0.12)]\r\nrtt_times: [0.25, 0.75]\r\nip: 93.184.216.34\r\n";
        rtt_time(&request("/rtt-time", Some(body)), &worker_ctx, &registry);

        let page = body_of(&analyze(&request("/analyze", None), &registry));
        assert!(page.contains("your location is at London with coordinates (51.5, -0.12) and IP 93.184.216.34"));
    }

    #[test]
    fn rtt_from_unregistered_connection_is_ignored() {
        let registry = WorkerRegistry::new();
        let (ctx, _rx) = ctx(5);
        let body = "worker_info: ['Nowhere', (0, 0)]\nrtt_times: [0.1]\nip: 1.2.3.4\n";

        let res = rtt_time(&request("/rtt-time", Some(body)), &ctx, &registry);
        assert_eq!(res.get_status_code(), HttpStatus::OK);
        assert!(registry.is_empty());
    }

    #[test]
    fn multi_line_target_is_not_dispatched() {
        let registry = WorkerRegistry::new();
        let (worker_ctx, mut rx) = ctx(1);
        registry
            .register(worker_ctx.id, worker_ctx.outbound.clone(), crate::protocol::WorkerInfo::new("A", crate::protocol::Coordinates::new(0.0, 0.0)))
            .unwrap();

        analyze(&request("/analyze?target=http%3A%2F%2Fa%2F%0D%0Aevil", None), &registry);
        assert!(rx.try_recv().is_err());
    }
}
