//! Google Gemini 适配器（专有流式方言）
//!
//! 请求：system 消息 → system_instruction，user → "user"，assistant → "model"，参数放入 generationConfig。
//! 流式：`streamGenerateContent?alt=sse` 输出 `data:` 行，每行一个 JSON，文本位于
//! candidates[0].content.parts[0].text。上游没有显式结束标记，终止标记在字节流关闭时由翻译器补发。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::GeminiSection;
use crate::core::GatewayError;
use crate::llm::stream::{ChunkContext, ChunkOutcome, DONE_MARKER};
use crate::llm::traits::{post_json, BackendAdapter, ProviderReply, ProviderRequest};
use crate::llm::types::{completion_id, unix_now, CanonicalResponse, ChatMessage, ChatRequest, Role, Usage};

const BACKEND: &str = "gemini";

/// 裸 `gemini` 对应的上游模型
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-flash-latest";
const API_KEY_HEADER: &str = "x-goog-api-key";

const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;
const DEFAULT_TEMPERATURE: f32 = 0.7;

pub struct GeminiAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GeminiAdapter {
    pub fn new(client: Client, config: &GeminiSection) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    /// 规范消息 → (contents, system_instruction)；多条 system 消息按顺序合并
    fn convert_history(messages: &[ChatMessage]) -> (Vec<Value>, Option<Value>) {
        let mut contents = Vec::new();
        let mut system_parts: Vec<&str> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                Role::User => contents.push(json!({ "role": "user", "parts": [{ "text": msg.content }] })),
                Role::Assistant => {
                    contents.push(json!({ "role": "model", "parts": [{ "text": msg.content }] }))
                }
            }
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(json!({ "parts": [{ "text": system_parts.join("\n\n") }] }))
        };
        (contents, system_instruction)
    }

    /// 上游模型名：`gemini` → gemini-flash-latest，其余原样
    fn upstream_model(model: &str) -> &str {
        if model == BACKEND {
            DEFAULT_GEMINI_MODEL
        } else {
            model
        }
    }

    fn candidate_text(v: &Value) -> &str {
        v["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
    }
}

#[async_trait]
impl BackendAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn id_prefix(&self) -> Option<&'static str> {
        Some(BACKEND)
    }

    fn translate_request(&self, request: &ChatRequest) -> Result<ProviderRequest, GatewayError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(GatewayError::MissingCredential {
                backend: BACKEND,
                var: "GEMINI_API_KEY",
            })?;

        let (contents, system_instruction) = Self::convert_history(&request.messages);
        let mut generation_config = json!({
            "maxOutputTokens": request.token_limit().unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            "temperature": request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        });
        if let Some(p) = request.top_p {
            generation_config["topP"] = json!(p);
        }
        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if let Some(sys) = system_instruction {
            body["system_instruction"] = sys;
        }

        // 凭证走请求头，不进入 URL
        let model = Self::upstream_model(&request.model);
        let url = if request.stream {
            format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, model)
        } else {
            format!("{}/models/{}:generateContent", self.base_url, model)
        };

        Ok(ProviderRequest {
            url,
            headers: vec![(API_KEY_HEADER, api_key.to_string())],
            body,
            stream: request.stream,
            model: model.to_string(),
        })
    }

    async fn invoke(&self, request: ProviderRequest) -> Result<ProviderReply, GatewayError> {
        post_json(&self.client, BACKEND, request).await
    }

    fn translate_response(&self, model: &str, body: Value) -> Result<CanonicalResponse, GatewayError> {
        let text = Self::candidate_text(&body).to_string();
        let usage = Usage::new(
            body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0),
            body["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0),
        );
        Ok(CanonicalResponse::new(
            completion_id(Some(BACKEND)),
            unix_now(),
            model.to_string(),
            text,
            usage,
        ))
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
            Ok(v) => match Self::candidate_text(&v) {
                "" => ChunkOutcome::Skip,
                text => ChunkOutcome::Chunk(ctx.chunk(text)),
            },
            Err(e) => {
                tracing::warn!(backend = BACKEND, error = %e, "skipping malformed stream line");
                ChunkOutcome::Skip
            }
        }
    }
}
