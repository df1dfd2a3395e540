//! reqwest-backed [`Fetcher`].
//!
//! ### Request
//! - URL from `HttpOptions::resolve_url` (`url`, or `protocol://host:port/path`)
//! - Configured headers are sent as given; `user-agent` is added only when
//!   the service did not set one
//! - Max redirects: 5
//!
//! ### Response
//! - gzip, brotli and deflate bodies are decoded transparently
//! - 2xx and 3xx: body parsed as JSON
//! - anything else: `Http { status, reason }` with the canonical reason phrase
//! - Max body bytes: 5MB (configurable)

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};

use snapcache_core::{ConfigError, Error, FetchedPayload, Fetcher, HttpOptions};

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent sent when a service sets none (default: "snapcache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "snapcache/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

pub struct HttpFetcher {
    http: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

fn request_headers(options: &HttpOptions) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::with_capacity(options.headers.len());
    for (name, value) in &options.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::Invalid {
            field: format!("http_options.headers.{name}"),
            reason: e.to_string(),
        })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| ConfigError::Invalid {
            field: format!("http_options.headers.{name}"),
            reason: e.to_string(),
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Lower-cased header names; repeated headers are joined with `, `.
fn response_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, options: &HttpOptions) -> Result<FetchedPayload, Error> {
        let start = Instant::now();
        let url = options.resolve_url()?;
        let method = Method::from_bytes(options.method.trim().to_uppercase().as_bytes()).map_err(|e| {
            ConfigError::Invalid { field: "http_options.method".into(), reason: format!("{}: {e}", options.method) }
        })?;

        let response = self
            .http
            .request(method, url.as_str())
            .headers(request_headers(options)?)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{url}: {e}")))?;

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(Error::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown Status").to_string(),
            });
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::Decode(format!("{len} bytes exceeds {}", self.config.max_bytes)));
        }

        let headers = response_headers(response.headers());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response: {e}")))?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::Decode(format!("{} bytes exceeds {}", bytes.len(), self.config.max_bytes)));
        }

        let body = serde_json::from_slice(&bytes).map_err(|e| Error::Decode(format!("{url}: {e}")))?;

        tracing::debug!(
            url = %url,
            status = status.as_u16(),
            bytes = bytes.len(),
            fetch_ms = start.elapsed().as_millis() as u64,
            "fetched"
        );

        Ok(FetchedPayload { status: status.as_u16(), headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer one connection with `response` and hand back the raw request.
    async fn serve_once(response: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.flush().await;
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn reply(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nX-Total: 2\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "snapcache/0.1");
        assert_eq!(config.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.max_redirects, 5);
    }

    #[tokio::test]
    async fn test_fetch_json_body() {
        let body = r#"[{"user":"barney","age":36,"active":true}]"#;
        let (base, server) = serve_once(reply("200 OK", body)).await;
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();

        let payload = fetcher.fetch(&HttpOptions::get(format!("{base}/users"))).await.unwrap();
        assert_eq!(payload.status, 200);
        assert_eq!(payload.body, json!([{ "user": "barney", "age": 36, "active": true }]));
        assert_eq!(payload.headers.get("content-type").map(String::as_str), Some("application/json"));
        assert_eq!(payload.headers.get("x-total").map(String::as_str), Some("2"));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /users HTTP/1.1"));
        assert!(request.to_lowercase().contains("user-agent: snapcache/0.1"));
    }

    #[tokio::test]
    async fn test_service_headers_win_over_default_user_agent() {
        let (base, server) = serve_once(reply("200 OK", "[]")).await;
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();

        let mut options = HttpOptions::get(format!("{base}/users"));
        options.headers.insert("User-Agent".into(), "curl/7.43.0".into());
        options.headers.insert("X-Api-Key".into(), "secret".into());
        fetcher.fetch(&options).await.unwrap();

        let request = server.await.unwrap().to_lowercase();
        assert!(request.contains("user-agent: curl/7.43.0"));
        assert!(!request.contains("snapcache/0.1"));
        assert!(request.contains("x-api-key: secret"));
    }

    #[tokio::test]
    async fn test_host_and_path_options() {
        let (base, server) = serve_once(reply("200 OK", "{}")).await;
        let addr = base.trim_start_matches("http://");
        let (host, port) = addr.split_once(':').unwrap();
        let options = HttpOptions {
            host: Some(host.to_string()),
            port: Some(port.parse().unwrap()),
            path: Some("/cities?country=ar".into()),
            method: "post".into(),
            ..Default::default()
        };

        let payload = HttpFetcher::new(FetchConfig::default()).unwrap().fetch(&options).await.unwrap();
        assert_eq!(payload.body, json!({}));
        assert!(server.await.unwrap().starts_with("POST /cities?country=ar HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_error_status_carries_reason() {
        let (base, _server) = serve_once(reply("500 Internal Server Error", r#"{"error":"boom"}"#)).await;
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();

        let err = fetcher.fetch(&HttpOptions::get(base)).await.unwrap_err();
        assert!(matches!(&err, Error::Http { status: 500, reason } if reason == "Internal Server Error"));
        assert!(err.to_string().contains("500 >> Internal Server Error"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_decode_error() {
        let (base, _server) = serve_once(reply("200 OK", "<html>nope</html>")).await;
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();

        let err = fetcher.fetch(&HttpOptions::get(base)).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let (base, _server) = serve_once(reply("200 OK", "[1,2,3,4,5,6,7,8,9,10]")).await;
        let config = FetchConfig { max_bytes: 8, ..Default::default() };

        let err = HttpFetcher::new(config).unwrap().fetch(&HttpOptions::get(base)).await.unwrap_err();
        assert!(matches!(err, Error::Decode(reason) if reason.contains("exceeds 8")));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();
        let err = fetcher.fetch(&HttpOptions::get(format!("http://{addr}/"))).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_unknown_method_is_config_error() {
        let fetcher = HttpFetcher::new(FetchConfig::default()).unwrap();
        let options = HttpOptions { method: "GE T".into(), ..HttpOptions::get("http://127.0.0.1:1/") };

        let err = fetcher.fetch(&options).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Invalid { .. })));
    }
}
