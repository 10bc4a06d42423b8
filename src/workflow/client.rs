//! Thin authenticated HTTP client for the workflow service.
//!
//! Endpoints used by a run:
//! - `POST /v1/resource/image` and a `PUT` to the returned pre-signed URL (`resource`).
//! - `GET /v1/workflows/{id}` (`template`).
//! - `POST /v1/jobs/workflow/template` and `GET /v1/jobs/{id}` (`job`).
//! - `GET` on the result image URL (`artifact`).
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};

use crate::config::Config;

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    config: Config,
}

impl ApiClient {
    pub fn new(config: Config) -> Self {
        let base = config.base_url.trim_end_matches('/').to_string();
        ApiClient {
            client: Client::new(),
            base_url: base,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Authenticated GET for a path relative to the base URL.
    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        let url = self.url(path);
        tracing::debug!("GET {}", url);
        self.authorize(self.client.get(url))
    }

    /// Authenticated POST for a path relative to the base URL.
    pub(crate) fn post(&self, path: &str) -> RequestBuilder {
        let url = self.url(path);
        tracing::debug!("POST {}", url);
        self.authorize(self.client.post(url))
    }

    /// Unauthenticated access to absolute, service-supplied URLs (pre-signed
    /// upload slots, result images). These must not carry our bearer token.
    pub(crate) fn raw(&self) -> &Client {
        &self.client
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(AUTHORIZATION, format!("Bearer {}", self.config.api_token))
            .header(ACCEPT, "application/json")
    }
}

/// Status code and body of a failed response, for error reporting.
pub(crate) async fn failure_parts(response: Response) -> (u16, String) {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unable to read error body".to_string());
    (status, body)
}
