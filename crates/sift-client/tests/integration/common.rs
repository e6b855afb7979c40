use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Canned response for one request target.
#[derive(Clone)]
pub struct Route {
    pub method: Option<&'static str>,
    pub target: String,
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Route {
    pub fn html(target: &str, body: impl Into<String>) -> Self {
        Self {
            method: None,
            target: target.to_string(),
            status: 200,
            content_type: "text/html; charset=utf-8",
            body: body.into().into_bytes(),
        }
    }

    pub fn bytes(target: &str, content_type: &'static str, body: &[u8]) -> Self {
        Self {
            method: None,
            target: target.to_string(),
            status: 200,
            content_type,
            body: body.to_vec(),
        }
    }

    pub fn only(mut self, method: &'static str) -> Self {
        self.method = Some(method);
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

/// Minimal HTTP/1.1 server on a loopback port.
pub struct TestServer {
    pub base: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub fn url(&self, target: &str) -> String {
        format!("{}{}", self.base, target)
    }

    /// `"METHOD target"` for every request received, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

pub async fn serve(routes: Vec<Route>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let routes = Arc::new(routes);

    let log = requests.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let routes = routes.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let _ = respond(stream, &routes, &log).await;
            });
        }
    });

    TestServer { base, requests }
}

/// A loopback address nothing listens on.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn respond(
    mut stream: TcpStream,
    routes: &[Route],
    log: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf);
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    log.lock().unwrap().push(format!("{method} {target}"));

    let route = routes
        .iter()
        .find(|r| r.target == target && r.method.is_none_or(|m| m == method));
    let (status, content_type, body) = match route {
        Some(r) => (r.status, r.content_type, r.body.as_slice()),
        None => (404, "text/plain", b"not found".as_slice()),
    };

    let header = format!(
        "HTTP/1.1 {status} X\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    if method != "HEAD" {
        stream.write_all(body).await?;
    }
    stream.shutdown().await
}
