use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use geolocate::framer::{FrameError, Framer};
use geolocate::protocol::{Coordinates, WorkerInfo};
use geolocate::server::Server;
use geolocate::worker::{self, WorkerConfig};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

struct Running {
    addr: SocketAddr,
    server: Arc<Server>,
    shutdown: CancellationToken,
    _root: TempDir,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start() -> Running {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.html"), "<h1>static</h1>").unwrap();
    std::fs::write(root.path().join("logo.png"), [0x89, b'P', b'N', b'G']).unwrap();

    let server = Arc::new(Server::builder().host("127.0.0.1").port(0).web_root(root.path()).build());
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = CancellationToken::new();
    let (serving, token) = (Arc::clone(&server), shutdown.clone());
    tokio::spawn(async move { serving.serve_on(listener, token).await });

    Running { addr, server, shutdown, _root: root }
}

struct Client {
    framer: Framer<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Client {
        let (read_half, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Client { framer: Framer::new(read_half), writer }
    }

    async fn send(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
    }

    async fn get(&mut self, path: &str, keep_alive: bool) -> (String, String) {
        let connection = if keep_alive { "keep-alive" } else { "close" };
        self.send(&format!("GET {} HTTP/1.1\r\nHost: test\r\nConnection: {}\r\n\r\n", path, connection))
            .await;
        self.response().await
    }

    async fn post(&mut self, path: &str, body: &str) -> (String, String) {
        self.send(&format!(
            "POST {} HTTP/1.1\r\nConnection: keep-alive\r\nContent-Length: {}\r\n\r\n{}",
            path,
            body.len(),
            body
        ))
        .await;
        self.response().await
    }

    async fn response(&mut self) -> (String, String) {
        read_response(&mut self.framer).await
    }

    async fn line(&mut self) -> String {
        String::from_utf8(self.framer.read_until(b"\n").await.unwrap().to_vec()).unwrap()
    }

    async fn assert_closed(&mut self) {
        assert!(matches!(
            self.framer.read_until(b"\n").await,
            Err(FrameError::EndOfStream { buffered: 0 })
        ));
    }
}

async fn read_response<R: AsyncRead + Unpin>(framer: &mut Framer<R>) -> (String, String) {
    let head = String::from_utf8(framer.read_until(b"\r\n\r\n").await.unwrap().to_vec()).unwrap();
    let length = head
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .map(|v| v.trim().parse::<usize>().unwrap())
        .unwrap_or(0);
    let body = framer.read_exactly(length).await.unwrap();
    (head, String::from_utf8_lossy(&body).into_owned())
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn keep_alive_serves_two_requests_then_closes() {
    let running = start().await;
    let mut client = Client::connect(running.addr).await;

    let (head, body) = client.get("/hello?name=Ada", true).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(head.contains("Server: geolocate\r\n"));
    assert!(head.contains("Connection: keep-alive"));
    assert!(body.contains("Hello Ada,"));

    let (head, _) = client.get("/", false).await;
    assert!(head.contains("Connection: close"));
    client.assert_closed().await;
}

#[tokio::test]
async fn empty_head_is_rejected_and_closed() {
    let running = start().await;
    let mut client = Client::connect(running.addr).await;

    client.send("\r\n\r\n").await;
    let (head, _) = client.response().await;
    assert!(head.starts_with("HTTP/1.1 400 BAD REQUEST\r\n"));
    client.assert_closed().await;
}

#[tokio::test]
async fn static_files_stay_inside_the_web_root() {
    let running = start().await;
    let mut client = Client::connect(running.addr).await;

    let (first, first_body) = client.get("/index.html", true).await;
    let (second, second_body) = client.get("/index.html", true).await;
    assert!(first.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(first.contains("Content-Type: text/html\r\n"));
    assert_eq!(first_body, "<h1>static</h1>");
    assert_eq!(first_body, second_body);
    assert!(second.starts_with("HTTP/1.1 200 OK\r\n"));

    let (png, _) = client.get("/logo.png", true).await;
    assert!(png.contains("Content-Type: image/png\r\n"));

    let (head, _) = client.get("/%2e%2e/%2e%2e/etc/passwd", true).await;
    assert!(head.starts_with("HTTP/1.1 404 NOT FOUND\r\n"));
    let (head, _) = client.get("/missing.css", false).await;
    assert!(head.starts_with("HTTP/1.1 404 NOT FOUND\r\n"));
    client.assert_closed().await;
}

#[tokio::test]
async fn post_is_only_for_worker_endpoints() {
    let running = start().await;
    let mut client = Client::connect(running.addr).await;

    let (head, body) = client.post("/index.html", "").await;
    assert!(head.starts_with("HTTP/1.1 405 METHOD NOT ALLOWED\r\n"));
    assert!(body.contains("Unrecognized method: POST"));
}

#[tokio::test]
async fn analyze_without_workers_renders_empty_state() {
    let running = start().await;
    let mut client = Client::connect(running.addr).await;

    let (head, body) = client.get("/analyze?target=http%3A%2F%2Fwww.example.com%2F", false).await;
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(body.contains("to 0 of 0 workers"));
    assert!(body.contains("No RTT measurements yet"));
}

#[tokio::test]
async fn workers_receive_dispatches_and_the_fastest_wins() {
    let running = start().await;

    let mut paris = Client::connect(running.addr).await;
    let mut sydney = Client::connect(running.addr).await;
    let (ack, _) = paris.post("/register_worker", "worker_info: ['Paris', (48.86, 2.35)]\r\n").await;
    assert!(ack.starts_with("HTTP/1.1 200 OK\r\n"));
    sydney.post("/register_worker", "worker_info: ['Sydney', (-33.87, 151.21)]\r\n").await;
    assert_eq!(running.server.registry().len(), 2);

    let mut browser = Client::connect(running.addr).await;
    let (_, page) = browser.get("/analyze?target=http%3A%2F%2Ftarget.example%2F", true).await;
    assert!(page.contains("to 2 of 2 workers"));
    assert_eq!(paris.line().await, "http://target.example/");
    assert_eq!(sydney.line().await, "http://target.example/");

    paris
        .post("/rtt-time", "worker_info: ['Paris', (48.86, 2.35)]\r\nrtt_times: [0.5, 0.25]\r\nip: 198.51.100.7\r\n")
        .await;
    sydney
        .post("/rtt-time", "worker_info: ['Sydney', (-33.87, 151.21)]\r\nrtt_times: [0.125]\r\nip: 198.51.100.7\r\n")
        .await;

    let (_, page) = browser.get("/analyze", true).await;
    assert!(page.contains("minimum RTT of 0.125 seconds, your location is at Sydney with coordinates (-33.87, 151.21)"));

    drop(sydney);
    let registry = Arc::clone(running.server.registry());
    eventually("sydney to deregister", || registry.len() == 1).await;

    let (_, page) = browser.get("/analyze", false).await;
    assert!(page.contains("minimum RTT of 0.375 seconds, your location is at Paris"));
}

#[tokio::test]
async fn concurrent_clients_are_counted_once_each() {
    const CLIENTS: u64 = 20;
    let running = start().await;

    let tasks: Vec<_> = (0..CLIENTS)
        .map(|n| {
            let addr = running.addr;
            tokio::spawn(async move {
                let mut client = Client::connect(addr).await;
                let (head, body) = client.get(&format!("/hello?name=c{}", n), false).await;
                assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
                assert!(body.contains(&format!("Hello c{},", n)));
                client.assert_closed().await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let stats = running.server.stats().snapshot();
    assert_eq!(stats.total_connections, CLIENTS);
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.num_requests, CLIENTS);
    assert_eq!(stats.num_errors, 0);
}

#[tokio::test]
async fn worker_client_measures_dispatched_targets() {
    let running = start().await;

    let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target_port = target.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = target.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;
            });
        }
    });

    let config = WorkerConfig {
        coordinator: running.addr.to_string(),
        info: WorkerInfo::new("Test Lab", Coordinates::new(10.0, 20.0)),
        samples: 2,
        fetch_timeout: Duration::from_secs(5),
    };
    let stop = CancellationToken::new();
    let worker_task = tokio::spawn(worker::run(config, stop.clone()));

    let registry = Arc::clone(running.server.registry());
    eventually("the worker to register", || registry.len() == 1).await;

    let mut browser = Client::connect(running.addr).await;
    let path = format!("/analyze?target=http%3A%2F%2F127.0.0.1%3A{}%2F", target_port);
    let (_, page) = browser.get(&path, true).await;
    assert!(page.contains("to 1 of 1 workers"));

    eventually("an rtt report", || registry.snapshot().iter().any(|w| w.avg_rtt.is_some())).await;
    let (_, page) = browser.get("/analyze", false).await;
    assert!(page.contains("your location is at Test Lab with coordinates (10, 20) and IP 127.0.0.1"));

    stop.cancel();
    worker_task.await.unwrap().unwrap();
    eventually("the worker to deregister", || registry.is_empty()).await;
}
