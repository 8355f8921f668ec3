//! HTTP client for the gateway, used by the console binary.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};

use crate::poller::{StatusSnapshot, StatusSource};
use crate::structures::{FileStatus, QueryMode};

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

/// Pull the `detail` field out of an error body when there is one.
fn detail_of(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(v) => v
            .get("detail")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.to_string(),
    }
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ragctl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(90))
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

    async fn read_json(resp: reqwest::Response) -> Result<Value, String> {
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("response unreadable: {}", e))?;
        if !status.is_success() {
            return Err(format!("HTTP {}: {}", status.as_u16(), detail_of(&text)));
        }
        serde_json::from_str(&text).map_err(|e| format!("malformed response: {}", e))
    }

    async fn get_json(&self, path: &str) -> Result<Value, String> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| format!("server unreachable: {}", e))?;
        Self::read_json(resp).await
    }

    pub async fn health(&self) -> Result<Value, String> {
        self.get_json("/health").await
    }

    pub async fn list_knowledge_bases(&self) -> Result<Vec<Value>, String> {
        let body = self.get_json("/api/knowledge-bases").await?;
        Ok(body
            .get("knowledge_bases")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn create_knowledge_base(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Value, String> {
        let resp = self
            .client
            .post(self.url("/api/knowledge-bases"))
            .json(&json!({ "name": name, "description": description }))
            .send()
            .await
            .map_err(|e| format!("server unreachable: {}", e))?;
        Self::read_json(resp).await
    }

    pub async fn list_files(&self, kb: &str) -> Result<Vec<Value>, String> {
        let path = format!("/api/files?knowledge_base={}", urlencoding::encode(kb));
        let body = self.get_json(&path).await?;
        Ok(body
            .get("files")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Ship every path as one multipart request so the server can report
    /// per-file success and failure together.
    pub async fn upload(&self, kb: &str, paths: &[PathBuf]) -> Result<Value, String> {
        let mut form = reqwest::multipart::Form::new().text("knowledge_base", kb.to_string());
        for path in paths {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.bin".to_string());
            form = form.part("files", reqwest::multipart::Part::bytes(bytes).file_name(filename));
        }
        let resp = self
            .client
            .post(self.url("/api/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| format!("server unreachable: {}", e))?;
        Self::read_json(resp).await
    }

    pub async fn start_parse(&self, filename: &str, kb: &str) -> Result<Value, String> {
        let resp = self
            .client
            .post(self.url("/api/parse"))
            .form(&[("filename", filename), ("knowledge_base", kb)])
            .send()
            .await
            .map_err(|e| format!("server unreachable: {}", e))?;
        Self::read_json(resp).await
    }

    /// Raw status document for one file, resolved by safe key or original
    /// name on the server side.
    pub async fn file_details(&self, file_key: &str) -> Result<Value, String> {
        let path = format!("/api/files/{}/status", urlencoding::encode(file_key));
        self.get_json(&path).await
    }

    pub async fn reset(&self, file_key: &str) -> Result<Value, String> {
        let path = format!("/api/files/{}/reset", urlencoding::encode(file_key));
        let resp = self
            .client
            .post(self.url(&path))
            .send()
            .await
            .map_err(|e| format!("server unreachable: {}", e))?;
        Self::read_json(resp).await
    }

    pub async fn reset_all(&self) -> Result<Value, String> {
        let resp = self
            .client
            .post(self.url("/api/files/reset-all"))
            .send()
            .await
            .map_err(|e| format!("server unreachable: {}", e))?;
        Self::read_json(resp).await
    }

    pub async fn delete(&self, file_key: &str) -> Result<Value, String> {
        let path = format!("/api/files/{}", urlencoding::encode(file_key));
        let resp = self
            .client
            .delete(self.url(&path))
            .send()
            .await
            .map_err(|e| format!("server unreachable: {}", e))?;
        Self::read_json(resp).await
    }

    pub async fn query(&self, query: &str, mode: QueryMode, kb: &str) -> Result<Value, String> {
        let resp = self
            .client
            .post(self.url("/api/query"))
            .json(&json!({
                "query": query,
                "mode": mode.as_str(),
                "knowledge_base": kb,
            }))
            .send()
            .await
            .map_err(|e| format!("server unreachable: {}", e))?;
        Self::read_json(resp).await
    }

    /// Run the query while a cosmetic narration keeps the terminal moving.
    /// The narration invents pacing, never content, and both sides are
    /// awaited before the answer is returned.
    pub async fn query_narrated(
        &self,
        query: &str,
        mode: QueryMode,
        kb: &str,
    ) -> Result<Value, String> {
        let (result, _) = tokio::join!(self.query(query, mode, kb), narrate_query(mode));
        result
    }
}

/// Canned retrieval stages with randomized pacing, written to stderr so
/// stdout stays clean for the answer.
async fn narrate_query(mode: QueryMode) {
    let stages: [(u8, &str); 4] = [
        (15, "Analyzing query"),
        (40, "Searching knowledge base"),
        (70, "Ranking passages"),
        (90, "Composing answer"),
    ];
    for (pct, stage) in stages {
        eprintln!("  [{:>3}%] {} ({})", pct, stage, mode.as_str());
        let pause: u64 = rand::thread_rng().gen_range(200..600);
        tokio::time::sleep(Duration::from_millis(pause)).await;
    }
}

#[async_trait]
impl StatusSource for ApiClient {
    async fn file_status(&self, file_key: &str) -> Result<StatusSnapshot, String> {
        let body = self.file_details(file_key).await?;
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .and_then(FileStatus::parse)
            .ok_or_else(|| format!("status response missing a readable status: {}", body))?;
        Ok(StatusSnapshot {
            status,
            progress: body
                .get("progress")
                .and_then(Value::as_u64)
                .unwrap_or(0)
                .min(100) as u8,
            message: body
                .get("message")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            error: body.get("error").and_then(Value::as_str).map(str::to_string),
        })
    }
}
