//! Thin HTTP client for the Canvas REST API.
//!
//! Handles bearer auth, `per_page=80` pagination via the `Link` header,
//! and the odd endpoints that nest their arrays under a key.

use reqwest::header::LINK;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::DatabaseError;

pub const PER_PAGE: u32 = 80;

#[derive(Error, Debug)]
pub enum CanvasError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Canvas API returned {status} for {url}")]
    Api {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Missing field in Canvas response: {0}")]
    MissingField(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type CanvasResult<T> = Result<T, CanvasError>;

pub struct CanvasClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CanvasClient {
    pub fn new(host: &str, token: &str) -> CanvasResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            base_url: format!("https://{host}/api/v1/"),
            token: token.to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_raw(&self, url: &str) -> CanvasResult<reqwest::Response> {
        debug!("GET {url}");
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CanvasError::Api {
                status: response.status(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    /// GET one page of results plus the next-page link, if any.
    async fn get_page<T: DeserializeOwned>(&self, url: &str) -> CanvasResult<(T, Option<String>)> {
        let response = self.get_raw(url).await?;
        let next = next_link(&response);
        let body = response.json::<T>().await?;
        Ok((body, next))
    }

    /// GET every page of a plain-array endpoint.
    pub async fn get_all<T: DeserializeOwned>(&self, path: &str) -> CanvasResult<Vec<T>> {
        let mut url = self.url(path);
        let mut items = Vec::new();
        loop {
            let (page, next): (Vec<T>, _) = self.get_page(&url).await?;
            items.extend(page);
            match next {
                Some(n) => url = n,
                None => break,
            }
        }
        Ok(items)
    }

    /// GET every page of an endpoint that nests its array under a key,
    /// the way `accounts/:id/terms` does. The caller's page type carries
    /// the key; the extractor unwraps it.
    pub async fn get_all_nested<P, T>(
        &self,
        path: &str,
        extract: fn(P) -> Vec<T>,
    ) -> CanvasResult<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut url = self.url(path);
        let mut items = Vec::new();
        loop {
            let (page, next): (P, _) = self.get_page(&url).await?;
            items.extend(extract(page));
            match next {
                Some(n) => url = n,
                None => break,
            }
        }
        Ok(items)
    }

    /// PUT with query-string parameters, returning the parsed body.
    pub async fn put_params<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> CanvasResult<T> {
        let url = self.url(path);
        debug!("PUT {url}");
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CanvasError::Api {
                status: response.status(),
                url,
            });
        }
        Ok(response.json().await?)
    }

    /// POST with query-string parameters, returning the parsed body.
    pub async fn post_params<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> CanvasResult<T> {
        let url = self.url(path);
        debug!("POST {url}");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!("POST {url} returned {}", response.status());
            return Err(CanvasError::Api {
                status: response.status(),
                url,
            });
        }
        Ok(response.json().await?)
    }

    /// PUT where only the status matters.
    pub async fn put_ok(&self, path: &str, params: &[(&str, String)]) -> CanvasResult<()> {
        let url = self.url(path);
        debug!("PUT {url}");
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CanvasError::Api {
                status: response.status(),
                url,
            });
        }
        Ok(())
    }
}

/// Pull the `rel="next"` URL out of a `Link` header.
fn next_link(response: &reqwest::Response) -> Option<String> {
    let header = response.headers().get(LINK)?.to_str().ok()?;
    for part in header.split(',') {
        let part = part.trim();
        if part.contains("rel=\"next\"") {
            let url = part.split(';').next()?.trim();
            return Some(url.trim_start_matches('<').trim_end_matches('>').to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_shape() {
        let client = CanvasClient::new("school.instructure.com", "token").unwrap();
        assert_eq!(
            client.url("accounts/1/terms"),
            "https://school.instructure.com/api/v1/accounts/1/terms"
        );
    }
}
