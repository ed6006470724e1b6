//! A canned HTTP upstream on a local port.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use animehub::config::Settings;
use animehub::MetadataClient;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Answers requests whose path starts with a route's prefix; anything else gets a 404.
pub struct CannedServer {
    pub base: String,
    requests: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct Route {
    pub prefix: String,
    pub status: u16,
    pub body: String,
}

pub fn ok(prefix: &str, body: &str) -> Route {
    Route {
        prefix: prefix.to_string(),
        status: 200,
        body: body.to_string(),
    }
}

pub fn status(prefix: &str, status: u16) -> Route {
    Route {
        prefix: prefix.to_string(),
        status,
        body: r#"{"message":"upstream failure"}"#.to_string(),
    }
}

impl CannedServer {
    pub async fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind canned server");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut reader = BufReader::new(read_half);
                    let mut request_line = String::new();
                    if reader.read_line(&mut request_line).await.is_err() {
                        return;
                    }
                    // drain headers; GET requests carry no body
                    loop {
                        let mut header = String::new();
                        match reader.read_line(&mut header).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) if header == "\r\n" || header == "\n" => break,
                            Ok(_) => {}
                        }
                    }
                    let target = request_line
                        .split_whitespace()
                        .nth(1)
                        .unwrap_or("/")
                        .to_string();
                    seen.lock().unwrap().push(target.clone());
                    let (status, body) = routes
                        .iter()
                        .find(|route| target.starts_with(&route.prefix))
                        .map(|route| (route.status, route.body.clone()))
                        .unwrap_or((404, r#"{"message":"not found"}"#.to_string()));
                    let response = format!(
                        "HTTP/1.1 {status} {}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{body}",
                        reason(status),
                        body.len(),
                    );
                    let _ = write_half.write_all(response.as_bytes()).await;
                    let _ = write_half.shutdown().await;
                });
            }
        });
        Self {
            base: format!("http://127.0.0.1:{}", addr.port()),
            requests,
            task,
        }
    }

    /// Request targets (path and query) in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Default settings with every upstream pointed at this server.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::defaults().expect("default settings");
        settings.api.kenjitsu = self.base.clone();
        settings.api.anilist_meta = format!("{}/meta/anilist", self.base);
        settings.api.trending_meta = format!("{}/trending/anilist", self.base);
        settings.api.advanced_meta = format!("{}/advanced/anilist", self.base);
        settings.api.consumet = format!("{}/consumet", self.base);
        settings.api.timeout_secs = 5;
        settings
    }

    pub fn client(&self) -> Arc<MetadataClient> {
        Arc::new(MetadataClient::new(self.settings().api).expect("client"))
    }
}

impl Drop for CannedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Status",
    }
}
