//! Stub HTTP endpoints standing in for the admin API, the registry and nodes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pingsix_gray::config::{AdminApi, GrayConfig, NodeProbe, Registry};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const API_KEY: &str = "test-api-key";

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What a stub saw of one request.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

#[derive(Clone, Debug)]
pub enum Reply {
    Respond(u16, String),
    /// Accept the request and never answer
    Hang,
    /// Read the request, then drop the connection without a response
    Close,
}

pub struct Stub {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Stub {
    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Starts a stub answering every request with `reply`.
pub async fn start_stub(reply: Reply) -> Stub {
    start_programmable_stub(move |_| reply.clone()).await
}

/// Starts a stub whose answer depends on the request.
pub async fn start_programmable_stub<F>(f: F) -> Stub
where
    F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let f = Arc::new(f);

    let recorded = requests.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                recorded.lock().unwrap().push(request.clone());

                match f(&request) {
                    Reply::Respond(status, body) => {
                        let response = format!(
                            "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            body.len()
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                    Reply::Hang => tokio::time::sleep(Duration::from_secs(30)).await,
                    Reply::Close => drop(socket),
                }
            });
        }
    });

    Stub { addr, requests }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let mut lines = head.split("\r\n");
    let target = lines.next()?.split(' ').nth(1)?.to_string();
    let (path, raw_query) = target.split_once('?').unwrap_or((target.as_str(), ""));

    let query = raw_query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    Some(Recorded {
        path: path.to_string(),
        query,
        headers,
    })
}

/// Starts a stub that drops the first `failures` connections, then answers with `reply`.
pub async fn start_flaky_stub(failures: usize, reply: Reply) -> Stub {
    let seen = AtomicUsize::new(0);
    start_programmable_stub(move |_| {
        if seen.fetch_add(1, Ordering::SeqCst) < failures {
            Reply::Close
        } else {
            reply.clone()
        }
    })
    .await
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn gray_config(admin: &str, registry: &str) -> GrayConfig {
    GrayConfig {
        deadline: 3000,
        admin: AdminApi {
            base_url: format!("{admin}/apisix/admin"),
            api_key: API_KEY.to_string(),
            timeout: 1000,
        },
        registry: Registry {
            server_addr: registry.to_string(),
            namespace: "public".to_string(),
            group: "DEFAULT_GROUP".to_string(),
            timeout: 1000,
            retries: 0,
            access_token: None,
        },
        node_probe: NodeProbe { timeout: 500 },
    }
}

pub fn service_upstream(service_name: &str) -> String {
    format!(r#"{{"key":"/apisix/upstreams/1","value":{{"id":"1","type":"roundrobin","discovery_type":"nacos","service_name":"{service_name}"}}}}"#)
}

pub fn node_upstream(addr: SocketAddr) -> String {
    format!(
        r#"{{"key":"/apisix/upstreams/2","value":{{"id":"2","type":"roundrobin","nodes":[{{"host":"{}","port":{},"weight":1}}]}}}}"#,
        addr.ip(),
        addr.port()
    )
}

pub fn instance_list(hosts: &[(&str, bool, Option<&str>)]) -> String {
    let hosts: Vec<serde_json::Value> = hosts
        .iter()
        .map(|(ip, healthy, gray_name)| {
            let mut metadata = serde_json::Map::new();
            if let Some(name) = gray_name {
                metadata.insert("gray-name".to_string(), (*name).into());
            }
            serde_json::json!({
                "ip": ip,
                "port": 8080,
                "healthy": healthy,
                "enabled": true,
                "metadata": metadata,
            })
        })
        .collect();
    serde_json::json!({ "name": "DEFAULT_GROUP@@orders", "hosts": hosts }).to_string()
}
