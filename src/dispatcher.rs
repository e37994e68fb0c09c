use std::sync::Arc;

use tracing::debug;

use crate::handler;
use crate::http_connection_context::ConnectionContext;
use crate::http_object::{HttpRequest, HttpResponse};
use crate::http_status::HttpStatus;
use crate::http_type::Method;
use crate::registry::WorkerRegistry;
use crate::static_files::StaticFiles;

/// The fixed route table, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Hello,
    Analyze,
    RegisterWorker,
    RttTime,
    Index,
    StaticFile,
}

impl Route {
    /// `path` is the request path without its query string.
    pub fn resolve(path: &str) -> Route {
        match path {
            "/hello" => Route::Hello,
            "/analyze" => Route::Analyze,
            "/register_worker" => Route::RegisterWorker,
            "/rtt-time" => Route::RttTime,
            "/" | "/index" => Route::Index,
            _ => Route::StaticFile,
        }
    }

    pub fn allows(self, method: Method) -> bool {
        match method {
            Method::GET => true,
            Method::POST => matches!(self, Route::RegisterWorker | Route::RttTime),
            _ => false,
        }
    }
}

pub struct Dispatcher {
    registry: Arc<WorkerRegistry>,
    static_files: StaticFiles,
}

impl Dispatcher {
    pub fn new(registry: Arc<WorkerRegistry>, static_files: StaticFiles) -> Dispatcher {
        Dispatcher { registry, static_files }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub async fn dispatch(&self, req: &HttpRequest, ctx: &ConnectionContext) -> HttpResponse {
        let route = Route::resolve(req.route_path());

        match req.method.parse::<Method>() {
            Ok(method) if route.allows(method) => {}
            _ => {
                debug!(method = %req.method, path = %req.path, "method not allowed");
                return HttpResponse::text(
                    HttpStatus::MethodNotAllowed,
                    format!("Unrecognized method: {}", req.method),
                );
            }
        }

        match route {
            Route::Hello => handler::hello(req),
            Route::Analyze => handler::analyze(req, &self.registry),
            Route::RegisterWorker => handler::register_worker(req, ctx, &self.registry),
            Route::RttTime => handler::rtt_time(req, ctx, &self.registry),
            Route::Index => handler::index(),
            Route::StaticFile => handler::static_file(req, &self.static_files).await,
        }
    }
}
