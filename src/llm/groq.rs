//! Groq 适配器（OpenAI 兼容方言）
//!
//! 上游已是规范格式：流式字节原样转发（StreamMode::Passthrough），
//! translate_chunk 仅供旁路累积器从 `data:` 行中重建全文；非流式响应 1:1 映射。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::GroqSection;
use crate::core::GatewayError;
use crate::llm::stream::{ChunkContext, ChunkOutcome, DONE_MARKER};
use crate::llm::traits::{post_json, BackendAdapter, ProviderReply, ProviderRequest, StreamMode};
use crate::llm::types::{CanonicalResponse, ChatRequest};

const BACKEND: &str = "groq";

/// 通用名 "groq" 映射到的默认快速模型
pub const GROQ_DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

pub struct GroqAdapter {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl GroqAdapter {
    pub fn new(client: Client, config: &GroqSection) -> Self {
        Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }

    /// `groq` → 默认模型；`groq-<name>` → `<name>`；其余原样
    pub fn upstream_model(model: &str) -> String {
        if model == "groq" {
            GROQ_DEFAULT_MODEL.to_string()
        } else if let Some(rest) = model.strip_prefix("groq-") {
            rest.to_string()
        } else {
            model.to_string()
        }
    }
}

#[async_trait]
impl BackendAdapter for GroqAdapter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn id_prefix(&self) -> Option<&'static str> {
        Some(BACKEND)
    }

    fn stream_mode(&self) -> StreamMode {
        StreamMode::Passthrough
    }

    fn translate_request(&self, request: &ChatRequest) -> Result<ProviderRequest, GatewayError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(GatewayError::MissingCredential {
                backend: BACKEND,
                var: "GROQ_API_KEY",
            })?;

        let model = Self::upstream_model(&request.model);
        let mut body = json!({
            "model": model,
            "messages": request.messages,
            "stream": request.stream,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = request.token_limit() {
            body["max_tokens"] = json!(n);
        }
        if let Some(p) = request.top_p {
            body["top_p"] = json!(p);
        }

        Ok(ProviderRequest {
            url: self.url.clone(),
            headers: vec![("Authorization", format!("Bearer {}", api_key))],
            body,
            stream: request.stream,
            model,
        })
    }

    async fn invoke(&self, request: ProviderRequest) -> Result<ProviderReply, GatewayError> {
        post_json(&self.client, BACKEND, request).await
    }

    fn translate_response(&self, _model: &str, body: Value) -> Result<CanonicalResponse, GatewayError> {
        let resp: CanonicalResponse = serde_json::from_value(body)
            .map_err(|e| GatewayError::transport(BACKEND, format!("invalid response: {}", e)))?;
        Ok(resp.normalized())
    }

    fn translate_chunk(&self, ctx: &ChunkContext, line: &str) -> ChunkOutcome {
        let Some(data) = line.strip_prefix("data:") else {
            return ChunkOutcome::Skip;
        };
        let data = data.trim();
        if data == DONE_MARKER {
            return ChunkOutcome::Done;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(v) => match v["choices"][0]["delta"]["content"].as_str() {
                Some(text) if !text.is_empty() => ChunkOutcome::Chunk(ctx.chunk(text)),
                _ => ChunkOutcome::Skip,
            },
            Err(e) => {
                tracing::warn!(backend = BACKEND, error = %e, "skipping malformed stream line");
                ChunkOutcome::Skip
            }
        }
    }
}
