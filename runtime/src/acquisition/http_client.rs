//! Plain HTTP GET client used for sitemap transport.

use anyhow::{Context, Result};
use std::time::Duration;

/// User agent sent with every sitemap request.
pub const USER_AGENT: &str = concat!("a11y-audit/", env!("CARGO_PKG_VERSION"));

/// A fetched document.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Thin wrapper around a shared `reqwest::Client`.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }

    /// GET `url`, reading the whole body as text.
    ///
    /// Non-success statuses are returned, not turned into errors; transport
    /// failures and timeouts are errors.
    pub async fn get(&self, url: &str, timeout_ms: u64) -> Result<HttpResponse> {
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .with_context(|| format!("reading body of {url}"))?;

        Ok(HttpResponse {
            status,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_returns_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpClient::new().unwrap();

        let ok = client.get(&format!("{}/ok", server.uri()), 5000).await.unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.body, "hello");

        let missing = client
            .get(&format!("{}/missing", server.uri()), 5000)
            .await
            .unwrap();
        assert_eq!(missing.status, 404);
        assert!(!missing.is_success());
    }
}
