//! 后端适配器抽象
//!
//! 每个上游（本地 Ollama / Groq / Gemini）实现 BackendAdapter：
//! translate_request（规范请求 → 上游请求，缺凭证在此报错，先于任何网络调用）、
//! invoke（发送）、translate_response（非流式上游响应 → 规范响应）、
//! translate_chunk（单行流式事件 → 规范块 / 终止 / 跳过）。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::core::GatewayError;
use crate::llm::stream::{ChunkContext, ChunkOutcome};
use crate::llm::types::{CanonicalResponse, ChatRequest};

/// 适配器翻译后的上游请求
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
    pub stream: bool,
    /// 上游实际使用的模型名（可能已被重写，如 groq → llama-3.3-70b-versatile）
    pub model: String,
}

/// 上游回复：非流式为完整 JSON，流式为尚未读取的响应体
#[derive(Debug)]
pub enum ProviderReply {
    Complete(Value),
    Stream(reqwest::Response),
}

/// 流式输出的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// 逐行翻译为规范块
    Translate,
    /// 上游已是规范方言：原样转发字节，旁路累积全文
    Passthrough,
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// 后端名（日志与错误信息用）
    fn name(&self) -> &'static str;

    /// 生成 completion id 时使用的前缀
    fn id_prefix(&self) -> Option<&'static str> {
        None
    }

    fn stream_mode(&self) -> StreamMode {
        StreamMode::Translate
    }

    fn translate_request(&self, request: &ChatRequest) -> Result<ProviderRequest, GatewayError>;

    async fn invoke(&self, request: ProviderRequest) -> Result<ProviderReply, GatewayError>;

    fn translate_response(&self, model: &str, body: Value) -> Result<CanonicalResponse, GatewayError>;

    fn translate_chunk(&self, ctx: &ChunkContext, line: &str) -> ChunkOutcome;
}

/// POST JSON 到上游；非 2xx 转为 Upstream 错误（带上游状态与正文）
pub(crate) async fn post_json(
    client: &Client,
    backend: &'static str,
    request: ProviderRequest,
) -> Result<ProviderReply, GatewayError> {
    let mut builder = client.post(&request.url).json(&request.body);
    for (name, value) in &request.headers {
        builder = builder.header(*name, value);
    }

    let resp = builder
        .send()
        .await
        .map_err(|e| GatewayError::http(backend, e))?;

    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        tracing::warn!(backend, status = status.as_u16(), "upstream returned error status");
        return Err(GatewayError::Upstream {
            backend,
            status: status.as_u16(),
            message: truncate(&message, 500),
        });
    }

    if request.stream {
        return Ok(ProviderReply::Stream(resp));
    }

    let body = resp
        .json::<Value>()
        .await
        .map_err(|e| GatewayError::http(backend, e))?;
    Ok(ProviderReply::Complete(body))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        s.chars().take(max_chars).collect::<String>() + "..."
    } else {
        s.to_string()
    }
}
