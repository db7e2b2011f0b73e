//! OpenSearch HTTP client
//!
//! Thin reqwest wrapper implementing [`StoreClient`]:
//! - basic auth and TLS (custom CA, client identity, verification bypass)
//! - round-robin over the configured URLs, starting at a random node
//! - a node that refuses connections is skipped for `health_check_interval`

use super::StoreClient;
use crate::config::CollectorConfig;
use crate::error::{CollectError, CollectResult};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Connection settings consumed by the client (passed through from config)
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    pub health_check_interval: Duration,
    pub enable_sniffer: bool,
    pub insecure_skip_verify: bool,
    pub tls_ca: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl From<&CollectorConfig> for ConnectionSettings {
    fn from(config: &CollectorConfig) -> Self {
        Self {
            urls: config.urls.clone(),
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config.password.clone(),
            timeout: config.timeout,
            health_check_interval: config.health_check_interval,
            enable_sniffer: config.enable_sniffer,
            insecure_skip_verify: config.insecure_skip_verify,
            tls_ca: config.tls_ca.clone(),
            tls_cert: config.tls_cert.clone(),
            tls_key: config.tls_key.clone(),
        }
    }
}

#[derive(Debug)]
struct Node {
    url: String,
    unhealthy_since: Mutex<Option<Instant>>,
}

impl Node {
    fn is_healthy(&self, retry_after: Duration) -> bool {
        match *self.unhealthy_since.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(since) => since.elapsed() >= retry_after,
            None => true,
        }
    }

    fn mark(&self, healthy: bool) {
        let mut guard = self.unhealthy_since.lock().unwrap_or_else(|e| e.into_inner());
        *guard = if healthy { None } else { Some(Instant::now()) };
    }
}

pub struct OpenSearchClient {
    http: reqwest::Client,
    nodes: Vec<Node>,
    next: AtomicUsize,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
    health_check_interval: Duration,
}

fn read_pem(path: &Path) -> CollectResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        CollectError::Configuration(format!("failed to read {}: {}", path.display(), e))
    })
}

impl OpenSearchClient {
    pub fn new(settings: &ConnectionSettings) -> CollectResult<Self> {
        if settings.urls.is_empty() {
            return Err(CollectError::Configuration("opensearch urls is not defined".to_string()));
        }

        if settings.enable_sniffer {
            log::warn!("⚠️  enable_sniffer is set but node discovery is not supported; using configured urls");
        }

        let mut builder = reqwest::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(settings.timeout);

        if settings.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ca) = &settings.tls_ca {
            let cert = reqwest::Certificate::from_pem(&read_pem(ca)?)
                .map_err(|e| CollectError::Configuration(format!("invalid tls_ca: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert), Some(key)) = (&settings.tls_cert, &settings.tls_key) {
            let mut pem = read_pem(cert)?;
            pem.extend(read_pem(key)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| CollectError::Configuration(format!("invalid tls_cert/tls_key: {}", e)))?;
            builder = builder.identity(identity);
        }

        let http = builder
            .build()
            .map_err(|e| CollectError::Connectivity(format!("failed to build http client: {}", e)))?;

        let nodes: Vec<Node> = settings
            .urls
            .iter()
            .map(|url| Node {
                url: url.trim_end_matches('/').to_string(),
                unhealthy_since: Mutex::new(None),
            })
            .collect();

        let start = rand::thread_rng().gen_range(0..nodes.len());

        Ok(Self {
            http,
            nodes,
            next: AtomicUsize::new(start),
            username: settings.username.clone(),
            password: settings.password.clone(),
            timeout: settings.timeout,
            health_check_interval: settings.health_check_interval,
        })
    }

    /// Nodes to try for one request: healthy ones in round-robin order,
    /// or every node when none is currently healthy
    fn candidates(&self) -> Vec<&Node> {
        let offset = self.next.fetch_add(1, Ordering::Relaxed);
        let ordered: Vec<&Node> = (0..self.nodes.len())
            .map(|i| &self.nodes[(offset + i) % self.nodes.len()])
            .collect();

        let healthy: Vec<&Node> = ordered
            .iter()
            .copied()
            .filter(|n| n.is_healthy(self.health_check_interval))
            .collect();

        if healthy.is_empty() {
            ordered
        } else {
            healthy
        }
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> CollectResult<Value> {
        let mut last_error = None;

        for node in self.candidates() {
            let url = format!("{}/{}", node.url, path);
            let mut request = self.http.request(method.clone(), &url);
            if let Some(username) = &self.username {
                request = request.basic_auth(username, self.password.as_ref());
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) if e.is_connect() => {
                    log::warn!("⚠️  OpenSearch node {} unreachable: {}", node.url, e);
                    node.mark(false);
                    last_error = Some(CollectError::Connectivity(format!("{}: {}", node.url, e)));
                    continue;
                }
                Err(e) if e.is_timeout() => return Err(CollectError::Timeout(self.timeout)),
                Err(e) => return Err(e.into()),
            };

            node.mark(true);
            let status = response.status();

            if status == StatusCode::NOT_FOUND {
                return Err(CollectError::NotFound(format!("{} returned 404", path)));
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                let snippet: String = text.chars().take(512).collect();
                return Err(CollectError::Connectivity(format!(
                    "{} returned {}: {}",
                    path, status, snippet
                )));
            }

            return response.json::<Value>().await.map_err(|e| {
                if e.is_timeout() {
                    CollectError::Timeout(self.timeout)
                } else {
                    CollectError::ResponseShape(format!("undecodable response from {}: {}", path, e))
                }
            });
        }

        Err(last_error.unwrap_or_else(|| {
            CollectError::Connectivity("no opensearch node available".to_string())
        }))
    }
}

#[async_trait]
impl StoreClient for OpenSearchClient {
    async fn search(&self, index: &str, body: &Value) -> CollectResult<Value> {
        self.request(Method::POST, &format!("{}/_search", index), Some(body))
            .await
    }

    async fn field_mapping(&self, index: &str) -> CollectResult<Value> {
        self.request(Method::GET, &format!("{}/_mapping", index), None)
            .await
    }

    fn backend_type(&self) -> &'static str {
        "OpenSearch"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(urls: &[&str]) -> ConnectionSettings {
        ConnectionSettings {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            username: None,
            password: None,
            timeout: Duration::from_secs(2),
            health_check_interval: Duration::from_secs(60),
            enable_sniffer: false,
            insecure_skip_verify: false,
            tls_ca: None,
            tls_cert: None,
            tls_key: None,
        }
    }

    #[test]
    fn test_requires_urls() {
        assert!(matches!(
            OpenSearchClient::new(&settings(&[])),
            Err(CollectError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_ca_file_is_configuration_error() {
        let mut s = settings(&["https://localhost:9200"]);
        s.tls_ca = Some(PathBuf::from("/nonexistent/ca.pem"));
        assert!(matches!(
            OpenSearchClient::new(&s),
            Err(CollectError::Configuration(_))
        ));
    }

    #[test]
    fn test_unhealthy_nodes_are_skipped() {
        let client = OpenSearchClient::new(&settings(&["http://a:9200/", "http://b:9200"])).unwrap();
        assert_eq!(client.candidates().len(), 2);

        client.nodes[0].mark(false);
        let candidates = client.candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "http://b:9200");

        client.nodes[1].mark(false);
        assert_eq!(client.candidates().len(), 2);

        client.nodes[0].mark(true);
        assert_eq!(client.candidates()[0].url, "http://a:9200");
    }

    #[tokio::test]
    async fn test_unreachable_store_is_connectivity_error() {
        let client = OpenSearchClient::new(&settings(&["http://127.0.0.1:1"])).unwrap();
        let err = client.field_mapping("metrics").await.unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {}", err);
    }
}
