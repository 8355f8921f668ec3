//! Seam to the external retrieval engine.
//!
//! Everything the gateway needs from the engine goes through
//! [`RetrievalBackend`], so tests can script answers without a network.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{
    ENGINE_HEALTH_TIMEOUT_SECS, ENGINE_INSERT_TIMEOUT_SECS, ENGINE_QUERY_TIMEOUT_SECS,
};
use crate::structures::QueryMode;

/// Incremental progress the engine reports for a document it is indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineProgress {
    pub progress: u8,
    pub message: Option<String>,
}

#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Liveness probe. `Err` carries a human-readable reason.
    async fn health(&self) -> Result<(), String>;

    /// Hand a stored document to the engine for parsing and indexing.
    /// Resolves only when the engine finishes or errors; large documents
    /// can take hours.
    async fn insert_document(&self, file_path: &str, knowledge_base: &str) -> Result<(), String>;

    /// Progress for a document the engine may track under `file_key`.
    /// `Ok(None)` when the engine has nothing for that key.
    async fn progress(&self, file_key: &str) -> Result<Option<EngineProgress>, String>;

    /// Run a retrieval query; returns the engine's answer verbatim.
    async fn query(
        &self,
        query: &str,
        mode: QueryMode,
        knowledge_base: &str,
    ) -> Result<Value, String>;
}

pub struct HttpRetrievalClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRetrievalClient {
    pub fn new(base_url: &str) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ragbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("failed to build http client: {}", e))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Keep engine error bodies readable in logs and status fields.
fn trim_body(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}

#[async_trait]
impl RetrievalBackend for HttpRetrievalClient {
    async fn health(&self) -> Result<(), String> {
        let resp = self
            .client
            .get(self.url("/health"))
            .timeout(Duration::from_secs(ENGINE_HEALTH_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| format!("engine unreachable: {}", e))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!(
                "engine health check returned HTTP {}",
                resp.status().as_u16()
            ))
        }
    }

    async fn insert_document(&self, file_path: &str, knowledge_base: &str) -> Result<(), String> {
        let payload = json!({
            "file_path": file_path,
            "knowledge_base": knowledge_base,
            "parse_method": "auto",
            "display_stats": true,
        });
        let resp = self
            .client
            .post(self.url("/api/parse-document"))
            .timeout(Duration::from_secs(ENGINE_INSERT_TIMEOUT_SECS))
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("engine request failed: {}", e))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(format!(
                "engine returned HTTP {}: {}",
                status.as_u16(),
                trim_body(&body)
            ))
        }
    }

    async fn progress(&self, file_key: &str) -> Result<Option<EngineProgress>, String> {
        let url = format!(
            "{}/api/progress/{}",
            self.base_url,
            urlencoding::encode(file_key)
        );
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(ENGINE_HEALTH_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| format!("engine unreachable: {}", e))?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                debug!("unparseable progress body for {}: {}", file_key, e);
                return Ok(None);
            }
        };
        match body.get("progress").and_then(Value::as_f64) {
            Some(p) => Ok(Some(EngineProgress {
                progress: p.clamp(0.0, 100.0) as u8,
                message: body
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })),
            None => Ok(None),
        }
    }

    async fn query(
        &self,
        query: &str,
        mode: QueryMode,
        knowledge_base: &str,
    ) -> Result<Value, String> {
        let payload = json!({
            "query": query,
            "mode": mode.as_str(),
            "knowledge_base": knowledge_base,
        });
        let resp = self
            .client
            .post(self.url("/api/query"))
            .timeout(Duration::from_secs(ENGINE_QUERY_TIMEOUT_SECS))
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("engine request failed: {}", e))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("engine response unreadable: {}", e))?;
        if !status.is_success() {
            return Err(format!(
                "engine query returned HTTP {}: {}",
                status.as_u16(),
                trim_body(&text)
            ));
        }
        // the engine wraps answers as {"status", "data", "mode"}; unwrap the
        // data field, fall back to the raw text for non-JSON bodies
        match serde_json::from_str::<Value>(&text) {
            Ok(body) => Ok(body.get("data").cloned().unwrap_or(body)),
            Err(_) => Ok(Value::String(text)),
        }
    }
}
