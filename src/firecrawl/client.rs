use std::time::Duration;

use reqwest::Client;

use super::Scraper;
use super::error::ScrapeError;
use super::types::{ScrapeRequest, ScrapeResponse, ScrapedArticle};

const API_URL: &str = "https://api.firecrawl.dev";

pub struct FirecrawlClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl FirecrawlClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, ScrapeError> {
        Self::with_base_url(api_key, API_URL.to_string(), timeout)
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        api_key: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl Scraper for FirecrawlClient {
    async fn scrape(&self, url: &str) -> Result<ScrapedArticle, ScrapeError> {
        let response = self
            .client
            .post(format!("{}/v1/scrape", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ScrapeRequest::markdown(url))
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs.saturating_mul(1000))
                .unwrap_or(1000);
            return Err(ScrapeError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ScrapeError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<ScrapeResponse>().await?;
        if !body.success {
            return Err(ScrapeError::ApiError {
                status: status.as_u16(),
                message: body.error.unwrap_or_else(|| "scrape unsuccessful".to_string()),
            });
        }

        let data = body.data.ok_or_else(|| ScrapeError::Empty(url.to_string()))?;
        let markdown = data
            .markdown
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| ScrapeError::Empty(url.to_string()))?;
        let title = data
            .metadata
            .and_then(|m| m.title)
            .unwrap_or_else(|| url.to_string());

        Ok(ScrapedArticle {
            url: url.to_string(),
            title,
            markdown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> FirecrawlClient {
        FirecrawlClient::with_base_url(
            "fc-test".into(),
            server.uri(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn scrape_returns_markdown_and_title() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/scrape"))
            .and(header("authorization", "Bearer fc-test"))
            .and(body_json(json!({
                "url": "https://example.com/post",
                "formats": ["markdown"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "markdown": "# Post\n\nBody text",
                    "metadata": {"title": "Post"}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let article = client_for(&server)
            .await
            .scrape("https://example.com/post")
            .await
            .unwrap();
        assert_eq!(article.title, "Post");
        assert!(article.markdown.contains("Body text"));
    }

    #[tokio::test]
    async fn scrape_maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .scrape("https://example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::RateLimited { retry_after_ms: 3000 }));
    }

    #[tokio::test]
    async fn huge_retry_after_saturates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("retry-after", "18446744073709551615"),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .scrape("https://example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::RateLimited { retry_after_ms: u64::MAX }));
    }

    #[tokio::test]
    async fn scrape_maps_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .scrape("https://example.com")
            .await
            .unwrap_err();
        match err {
            ScrapeError::ApiError { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn scrape_unsuccessful_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "error": "robots.txt disallows"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .scrape("https://example.com")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("robots.txt disallows"));
    }

    #[tokio::test]
    async fn scrape_without_markdown_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": {"markdown": "  "}})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .scrape("https://example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Empty(_)));
    }
}
