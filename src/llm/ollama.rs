//! 本地推理服务适配器（Ollama /api/chat）
//!
//! 上游流式输出为逐行 JSON（NDJSON）：`{"message":{"content":"..."},"done":false}`，
//! done=true 的行即终止；格式错误的单行记录日志后跳过，不中断流。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::OllamaSection;
use crate::core::GatewayError;
use crate::llm::stream::{ChunkContext, ChunkOutcome};
use crate::llm::traits::{post_json, BackendAdapter, ProviderReply, ProviderRequest};
use crate::llm::types::{
    completion_id, unix_now, CanonicalResponse, ChatRequest, ModelInfo, Usage,
};

const BACKEND: &str = "ollama";

/// 前端通用名 → 本地实际可用模型
const GENERIC_LOCAL_MODEL: &str = "local-model";
const GENERIC_LOCAL_TARGET: &str = "phi:latest";

pub struct OllamaAdapter {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OllamaLine {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    modified_at: Option<String>,
}

impl OllamaAdapter {
    pub fn new(client: Client, config: &OllamaSection) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn upstream_model(model: &str) -> String {
        if model == GENERIC_LOCAL_MODEL {
            GENERIC_LOCAL_TARGET.to_string()
        } else {
            model.to_string()
        }
    }

    /// 本地已安装模型（/api/tags）
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, GatewayError> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| GatewayError::http(BACKEND, e))?;
        if !resp.status().is_success() {
            return Err(GatewayError::Upstream {
                backend: BACKEND,
                status: resp.status().as_u16(),
                message: "failed to fetch models".to_string(),
            });
        }
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::http(BACKEND, e))?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| {
                let created = m
                    .modified_at
                    .as_deref()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.timestamp())
                    .unwrap_or_else(unix_now);
                ModelInfo::new(m.name, created, "ollama")
            })
            .collect())
    }
}

#[async_trait]
impl BackendAdapter for OllamaAdapter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn translate_request(&self, request: &ChatRequest) -> Result<ProviderRequest, GatewayError> {
        let model = Self::upstream_model(&request.model);
        let body = json!({
            "model": model,
            "messages": request.messages,
            "stream": request.stream,
            "options": {
                "temperature": request.temperature,
                "top_p": request.top_p,
                "repeat_penalty": request.repetition_penalty,
                "num_predict": request.token_limit(),
            }
        });
        Ok(ProviderRequest {
            url: self.chat_url(),
            headers: Vec::new(),
            body,
            stream: request.stream,
            model,
        })
    }

    async fn invoke(&self, request: ProviderRequest) -> Result<ProviderReply, GatewayError> {
        post_json(&self.client, BACKEND, request).await
    }

    fn translate_response(&self, model: &str, body: Value) -> Result<CanonicalResponse, GatewayError> {
        let line: OllamaLine = serde_json::from_value(body)
            .map_err(|e| GatewayError::transport(BACKEND, format!("invalid response: {}", e)))?;
        let content = line.message.map(|m| m.content).unwrap_or_default();
        let usage = Usage::new(
            line.prompt_eval_count.unwrap_or(0),
            line.eval_count.unwrap_or(0),
        );
        Ok(CanonicalResponse::new(
            completion_id(None),
            unix_now(),
            model.to_string(),
            content,
            usage,
        ))
    }

    fn translate_chunk(&self, ctx: &ChunkContext, line: &str) -> ChunkOutcome {
        match serde_json::from_str::<OllamaLine>(line) {
            Ok(parsed) if parsed.done => ChunkOutcome::Done,
            Ok(parsed) => {
                let content = parsed.message.map(|m| m.content).unwrap_or_default();
                ChunkOutcome::Chunk(ctx.chunk(content))
            }
            Err(e) => {
                tracing::warn!(backend = BACKEND, error = %e, "skipping malformed stream line");
                ChunkOutcome::Skip
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ChatMessage;

    fn adapter(base_url: &str) -> OllamaAdapter {
        OllamaAdapter::new(
            Client::new(),
            &OllamaSection {
                base_url: base_url.to_string(),
                default_model: "phi3:mini".to_string(),
            },
        )
    }

    #[test]
    fn test_translate_request_maps_options_and_generic_model() {
        let mut req = ChatRequest::new("local-model", vec![ChatMessage::user("hola")]);
        req.temperature = Some(0.5);
        req.repetition_penalty = Some(1.1);
        req.max_new_tokens = Some(256);
        req.stream = true;

        let p = adapter("http://localhost:11434/").translate_request(&req).unwrap();
        assert_eq!(p.url, "http://localhost:11434/api/chat");
        assert_eq!(p.model, "phi:latest");
        assert_eq!(p.body["model"], "phi:latest");
        assert_eq!(p.body["stream"], true);
        assert_eq!(p.body["options"]["num_predict"], 256);
        assert_eq!(p.body["messages"][0]["role"], "user");
        assert!(p.body["options"]["top_p"].is_null());
    }

    #[test]
    fn test_translate_chunk_content_done_and_malformed() {
        let a = adapter("http://x");
        let ctx = ChunkContext::new(None, "phi");
        match a.translate_chunk(&ctx, r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#) {
            ChunkOutcome::Chunk(c) => assert_eq!(c.delta_content, "Hi"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            a.translate_chunk(&ctx, r#"{"message":{"content":""},"done":true}"#),
            ChunkOutcome::Done
        );
        assert_eq!(a.translate_chunk(&ctx, "{not json"), ChunkOutcome::Skip);
    }

    #[test]
    fn test_translate_response_includes_usage() {
        let body = json!({
            "model": "phi",
            "message": {"role": "assistant", "content": "Hello there"},
            "done": true,
            "prompt_eval_count": 12,
            "eval_count": 30
        });
        let resp = adapter("http://x").translate_response("phi", body).unwrap();
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.content(), "Hello there");
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.total_tokens, 42);
    }

    #[tokio::test]
    async fn test_list_models_from_tags() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"models":[{"name":"phi:latest","modified_at":"2024-05-01T10:00:00Z"},{"name":"llama3:8b"}]}"#)
            .create_async()
            .await;

        let models = adapter(&server.url()).list_models().await.unwrap();
        mock.assert_async().await;
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "phi:latest");
        assert_eq!(models[0].owned_by, "ollama");
        assert_eq!(models[0].created, 1714557600);
    }
}
