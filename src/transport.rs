use std::sync::Mutex;

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{trace, warn};

use crate::decoder::decode;
use crate::logger::MessageLogger;
use crate::{Error, Result};

/// The set endpoint only accepts JSON text under a form content type.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// HTTP plumbing shared by the topology resolver and the device client.
pub(crate) struct Transport {
    http: reqwest::Client,
    base_url: String,
    logger: Option<Mutex<MessageLogger>>,
}

impl Transport {
    pub fn new(http: reqwest::Client, base_url: String, logger: Option<MessageLogger>) -> Self {
        Self {
            http,
            base_url,
            logger: logger.map(Mutex::new),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body and decode the answer, whatever shape it arrives in.
    pub async fn post_json(&self, path: &'static str, body: &Value) -> Result<Value> {
        self.with_logger(|l| l.log_request("POST", path, Some(body)));
        let request = self.http.post(self.url(path)).json(body);
        self.execute(path, request).await
    }

    /// POST JSON text with a form content type, as the set endpoint expects.
    pub async fn post_form_json(&self, path: &'static str, body: &Value) -> Result<Value> {
        self.with_logger(|l| l.log_request("POST", path, Some(body)));
        let request = self
            .http
            .post(self.url(path))
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body.to_string());
        self.execute(path, request).await
    }

    pub fn log_command(&self, action: &str, unit: &str, body: &Value) {
        self.with_logger(|l| l.log_command(action, unit, body));
    }

    async fn execute(&self, path: &'static str, request: reqwest::RequestBuilder) -> Result<Value> {
        let resp = request.send().await?;
        let status = resp.status().as_u16();
        if status != 200 {
            self.with_logger(|l| l.log_response(path, status, &Value::Null));
            return Err(Error::HttpStatus { path, code: status });
        }

        let raw = resp.bytes().await?;
        trace!(path, len = raw.len(), "response received");
        let body = decode(&raw)?;
        self.with_logger(|l| l.log_response(path, status, &body));
        Ok(body)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_logger(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(logger) = &self.logger {
            match logger.lock() {
                Ok(mut guard) => f(&mut guard),
                Err(_) => warn!("message log lock poisoned"),
            }
        }
    }
}
