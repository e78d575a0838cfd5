//! Client for the CiviCRM v3 REST endpoint.
//!
//! Every call is a POST to `rest.php` with a form-urlencoded body carrying
//! the credentials, entity, action, and a JSON payload string. That is the
//! only request shape the endpoint accepts reliably.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum CrmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CRM API error: {0}")]
    Api(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Unexpected CRM response shape: {0}")]
    Shape(String),

    #[error("Invalid CRM data: {0}")]
    InvalidData(String),
}

pub type CrmResult<T> = Result<T, CrmError>;

pub struct CrmClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    site_key: String,
}

impl CrmClient {
    pub fn new(host: &str, api_key: &str, site_key: &str) -> CrmResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            url: format!("https://{host}/sites/all/modules/civicrm/extern/rest.php"),
            api_key: api_key.to_string(),
            site_key: site_key.to_string(),
        })
    }

    async fn call(&self, entity: &str, action: &str, json: &Value) -> CrmResult<Value> {
        debug!("CRM {entity}.{action}");
        let payload = json.to_string();
        let form = [
            ("api_key", self.api_key.as_str()),
            ("key", self.site_key.as_str()),
            ("version", "3"),
            ("entity", entity),
            ("action", action),
            ("json", payload.as_str()),
        ];
        let response = self
            .http
            .post(&self.url)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = response.json().await?;
        if body.get("is_error").and_then(Value::as_i64).unwrap_or(0) != 0 {
            let message = body
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(CrmError::Api(format!("{entity}.{action}: {message}")));
        }
        Ok(body)
    }

    pub async fn api_get(&self, entity: &str, json: &Value) -> CrmResult<Value> {
        self.call(entity, "get", json).await
    }

    pub async fn api_create(&self, entity: &str, json: &Value) -> CrmResult<Value> {
        self.call(entity, "create", json).await
    }
}

/// CiviCRM is loose with its types: numbers come back as strings about as
/// often as numbers.
pub fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// A string from a value that may be a string, number, or missing.
pub fn lenient_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lenient_parsing() {
        assert_eq!(lenient_i64(&json!(73)), Some(73));
        assert_eq!(lenient_i64(&json!("73")), Some(73));
        assert_eq!(lenient_i64(&json!(null)), None);
        assert_eq!(lenient_string(&json!("George")), "George");
        assert_eq!(lenient_string(&json!(2030)), "2030");
        assert_eq!(lenient_string(&json!(null)), "");
    }
}
