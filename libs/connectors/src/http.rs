//! Generic REST connector.
//!
//! Submits the job payload to a backend with `POST {base_url}/{submit_path}`,
//! then polls `{base_url}/{status_path}/{remote_id}` until the backend
//! reports a terminal state. Concrete service dialects (ComfyUI's
//! WebSocket protocol, hosted-API SDKs, A1111) live outside this crate;
//! this connector covers backends that speak the plain submit/poll shape.
//!
//! Expected status document:
//!
//! ```json
//! {"status": "queued|running|completed|failed", "progress": 42,
//!  "result": {...}, "error": "..."}
//! ```

use crate::context::ExecutionContext;
use crate::error::ConnectorError;
use crate::{Connector, ProbeReport};
use async_trait::async_trait;
use domain_jobs::error::FailureKind;
use domain_jobs::models::Job;
use domain_jobs::progress::ProgressUpdate;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpConnectorConfig {
    /// Service name advertised to the matcher.
    pub service_name: String,
    pub base_url: String,
    pub submit_path: String,
    pub status_path: String,
    /// Probe endpoint returning `{"models": [...]}` (optional fields).
    pub models_path: Option<String>,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// Bearer token added to every request when set.
    pub auth_token: Option<String>,
}

impl HttpConnectorConfig {
    pub fn new(service_name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            base_url: base_url.into(),
            submit_path: "jobs".to_string(),
            status_path: "jobs".to_string(),
            models_path: None,
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            auth_token: None,
        }
    }
}

pub struct HttpConnector {
    config: HttpConnectorConfig,
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(config: HttpConnectorConfig) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn read_or_status_error(
        &self,
        response: reqwest::Response,
    ) -> Result<Value, ConnectorError> {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            let snippet: String = body.chars().take(256).collect();
            return Err(ConnectorError::from_status(status, &snippet));
        }
        serde_json::from_str(&body).map_err(|e| {
            ConnectorError::execution(
                FailureKind::TransientNetwork,
                format!("backend returned unparseable body: {}", e),
            )
        })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn name(&self) -> &str {
        &self.config.service_name
    }

    async fn probe(&self) -> Result<ProbeReport, ConnectorError> {
        let Some(models_path) = &self.config.models_path else {
            return Ok(ProbeReport {
                healthy: true,
                ..Default::default()
            });
        };

        let response = self
            .request(self.client.get(self.url(models_path)))
            .send()
            .await
            .map_err(|e| ConnectorError::Probe(e.to_string()))?;
        let body = self
            .read_or_status_error(response)
            .await
            .map_err(|e| ConnectorError::Probe(e.to_string()))?;

        let models = body
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let limits: HashMap<String, Value> = body
            .get("limits")
            .and_then(Value::as_object)
            .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Ok(ProbeReport {
            models,
            limits,
            healthy: true,
        })
    }

    async fn execute(&self, job: &Job, ctx: &ExecutionContext) -> Result<Value, ConnectorError> {
        // Submit.
        let response = self
            .request(self.client.post(self.url(&self.config.submit_path)))
            .json(&job.payload)
            .send()
            .await?;
        let submitted = self.read_or_status_error(response).await?;
        let remote_id = submitted
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ConnectorError::execution(
                    FailureKind::TransientNetwork,
                    "backend submit response had no id",
                )
            })?
            .to_string();
        debug!(job_id = %job.id, remote_id = %remote_id, "Submitted to backend");

        // Poll until terminal, watching the cancellation signal between
        // round-trips.
        let status_url = self.url(&format!("{}/{}", self.config.status_path, remote_id));
        loop {
            if ctx.is_cancelled() {
                let _ = self.cancel(&remote_id).await;
                return Err(ConnectorError::Cancelled);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = ctx.cancelled() => {
                    let _ = self.cancel(&remote_id).await;
                    return Err(ConnectorError::Cancelled);
                }
            }

            let response = self.request(self.client.get(&status_url)).send().await?;
            let status_doc = self.read_or_status_error(response).await?;

            if let Some(progress) = status_doc.get("progress").and_then(Value::as_u64) {
                ctx.report_progress(ProgressUpdate::percent(progress.min(100) as u8));
            }

            match status_doc.get("status").and_then(Value::as_str) {
                Some("completed") => {
                    return Ok(status_doc.get("result").cloned().unwrap_or(Value::Null));
                }
                Some("failed") => {
                    let message = status_doc
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("backend reported failure");
                    return Err(ConnectorError::execution(
                        FailureKind::classify_message(message),
                        message,
                    ));
                }
                _ => continue,
            }
        }
    }

    async fn cancel(&self, remote_id: &str) -> Result<(), ConnectorError> {
        let url = self.url(&format!("{}/{}/cancel", self.config.status_path, remote_id));
        // Best effort: a backend without a cancel endpoint just 404s.
        let _ = self.request(self.client.post(url)).send().await;
        Ok(())
    }
}
