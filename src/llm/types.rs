//! 规范协议类型（OpenAI chat-completions 形状）
//!
//! 网关对外只说这一种协议：ChatRequest 进，CanonicalResponse / CanonicalChunk 出。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// 消息角色（与 OpenAI API 一致，小写序列化）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 单条消息；顺序即对话顺序，端到端保持
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 规范请求：model 缺省时由路由器填入本地默认模型
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// 部分前端使用的别名，仅在 max_tokens 缺省时生效
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    /// 生效的最大生成 token 数
    pub fn token_limit(&self) -> Option<u32> {
        self.max_tokens.or(self.max_new_tokens)
    }
}

pub const FINISH_STOP: &str = "stop";

/// 规范增量块；线上格式为 chat.completion.chunk
#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalChunk {
    pub id: String,
    pub created: i64,
    pub model: String,
    pub delta_content: String,
    pub finish_reason: Option<String>,
}

impl CanonicalChunk {
    pub fn to_json(&self) -> Value {
        let delta = if self.finish_reason.is_some() && self.delta_content.is_empty() {
            json!({})
        } else {
            json!({ "content": self.delta_content })
        };
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": self.finish_reason,
            }]
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// 规范非流式响应：恰好一个 choice，finish_reason 非空
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub id: String,
    #[serde(default = "completion_object")]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

fn completion_object() -> String {
    "chat.completion".to_string()
}

impl CanonicalResponse {
    pub fn new(id: String, created: i64, model: String, content: String, usage: Usage) -> Self {
        Self {
            id,
            object: completion_object(),
            created,
            model,
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: Role::Assistant,
                    content: Some(content),
                },
                finish_reason: Some(FINISH_STOP.to_string()),
            }],
            usage,
        }
    }

    /// 收敛为单 choice 且 finish_reason 非空（上游多 choice 时只保留第一个）
    pub fn normalized(mut self) -> Self {
        self.choices.truncate(1);
        if self.choices.is_empty() {
            self.choices.push(Choice {
                index: 0,
                message: ResponseMessage {
                    role: Role::Assistant,
                    content: Some(String::new()),
                },
                finish_reason: None,
            });
        }
        for choice in &mut self.choices {
            if choice.finish_reason.is_none() {
                choice.finish_reason = Some(FINISH_STOP.to_string());
            }
        }
        self
    }

    /// 助手回复全文（供工具指令扫描）
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("")
    }
}

/// /v1/models 列表项
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, created: i64, owned_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "model".to_string(),
            created,
            owned_by: owned_by.into(),
        }
    }
}

/// 生成 completion id：`chatcmpl-<prefix>-<uuid>`
pub fn completion_id(prefix: Option<&str>) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    match prefix {
        Some(p) => format!("chatcmpl-{}-{}", p, uuid),
        None => format!("chatcmpl-{}", uuid),
    }
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
