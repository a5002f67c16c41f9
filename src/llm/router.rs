//! 请求路由器
//!
//! 按模型 id 的有序谓词选择后端：
//! - `gemini*` → Gemini
//! - `groq*` 或包含 `llama-3.3-70b` → Groq
//! - 其余一律走本地（回退分支，从不报错）
//!
//! 派发前将持久记忆注入第 0 条 system 消息。

use std::sync::Arc;

use reqwest::Client;

use crate::config::AppConfig;
use crate::core::GatewayError;
use crate::llm::gemini::GeminiAdapter;
use crate::llm::groq::GroqAdapter;
use crate::llm::ollama::OllamaAdapter;
use crate::llm::stream::{sse_body, tee, translate_stream, ChatStream, ChunkContext};
use crate::llm::traits::{BackendAdapter, ProviderReply, StreamMode};
use crate::llm::types::{unix_now, CanonicalResponse, ChatMessage, ChatRequest, ModelInfo, Role};
use crate::memory::MemoryStore;

/// 后端选择结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local,
    Groq,
    Gemini,
}

/// 纯函数：模型 id → 后端
pub fn select_route(model: &str) -> Route {
    if model.starts_with("gemini") {
        Route::Gemini
    } else if model.starts_with("groq") || model.contains("llama-3.3-70b") {
        Route::Groq
    } else {
        Route::Local
    }
}

/// 云端虚拟模型（总是出现在模型列表中）
const VIRTUAL_MODELS: &[(&str, &str)] = &[
    ("gemini-flash-latest", "google"),
    ("groq-llama-3.3-70b-versatile", "groq"),
    ("groq-mixtral-8x7b-32768", "groq"),
];

/// 派发结果：完整响应或流
pub enum Completion {
    Response(CanonicalResponse),
    Stream(ChatStream),
}

pub struct RequestRouter {
    local: Arc<OllamaAdapter>,
    groq: Arc<dyn BackendAdapter>,
    gemini: Arc<dyn BackendAdapter>,
    memory: Arc<MemoryStore>,
    default_model: String,
}

impl RequestRouter {
    pub fn new(
        local: Arc<OllamaAdapter>,
        groq: Arc<dyn BackendAdapter>,
        gemini: Arc<dyn BackendAdapter>,
        memory: Arc<MemoryStore>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            local,
            groq,
            gemini,
            memory,
            default_model: default_model.into(),
        }
    }

    /// 由配置构造三个适配器（共享同一个 HTTP 连接池）
    pub fn from_config(client: Client, config: &AppConfig, memory: Arc<MemoryStore>) -> Self {
        let backends = &config.backends;
        Self::new(
            Arc::new(OllamaAdapter::new(client.clone(), &backends.ollama)),
            Arc::new(GroqAdapter::new(client.clone(), &backends.groq)),
            Arc::new(GeminiAdapter::new(client, &backends.gemini)),
            memory,
            backends.ollama.default_model.clone(),
        )
    }

    pub fn adapter_for(&self, route: Route) -> Arc<dyn BackendAdapter> {
        match route {
            Route::Local => self.local.clone() as Arc<dyn BackendAdapter>,
            Route::Groq => self.groq.clone(),
            Route::Gemini => self.gemini.clone(),
        }
    }

    /// 补默认模型；保证第 0 条为 system 消息且带有记忆上下文
    pub fn prepare(&self, mut request: ChatRequest) -> ChatRequest {
        if request.model.trim().is_empty() {
            request.model = self.default_model.clone();
        }
        let context = self.memory.context_string();
        match request.messages.first_mut() {
            Some(first) if first.role == Role::System => first.content.push_str(&context),
            _ => request.messages.insert(0, ChatMessage::system(context)),
        }
        request
    }

    pub async fn dispatch(&self, request: ChatRequest) -> Result<Completion, GatewayError> {
        let request = self.prepare(request);
        let route = select_route(&request.model);
        let adapter = self.adapter_for(route);

        let provider_request = adapter.translate_request(&request)?;
        let model = provider_request.model.clone();
        tracing::info!(
            backend = adapter.name(),
            model = %model,
            stream = request.stream,
            "dispatching chat completion"
        );

        match adapter.invoke(provider_request).await? {
            ProviderReply::Complete(body) => {
                let response = adapter.translate_response(&model, body)?;
                Ok(Completion::Response(response.normalized()))
            }
            ProviderReply::Stream(resp) => {
                let ctx = ChunkContext::new(adapter.id_prefix(), model);
                let bytes = resp.bytes_stream();
                let stream = match adapter.stream_mode() {
                    StreamMode::Translate => sse_body(translate_stream(adapter, ctx, bytes)),
                    StreamMode::Passthrough => tee(adapter, ctx, bytes),
                };
                Ok(Completion::Stream(stream))
            }
        }
    }

    /// 本地已安装模型 + 云端虚拟模型；本地不可达时返回固定回退列表
    pub async fn list_models(&self) -> Vec<ModelInfo> {
        let now = unix_now();
        match self.local.list_models().await {
            Ok(mut models) => {
                models.extend(
                    VIRTUAL_MODELS
                        .iter()
                        .map(|(id, owner)| ModelInfo::new(*id, now, *owner)),
                );
                models
            }
            Err(e) => {
                tracing::warn!(error = %e, "local model discovery failed, using fallback list");
                vec![
                    ModelInfo::new("phi:latest", now, "fallback"),
                    ModelInfo::new("gemini-flash-latest", now, "google"),
                    ModelInfo::new("groq-llama-3.3-70b-versatile", now, "groq"),
                ]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeminiSection, GroqSection, OllamaSection};
    use bytes::Bytes;
    use futures_util::StreamExt;

    fn router_with(
        dir: &std::path::Path,
        ollama_url: &str,
        groq: GroqSection,
        gemini: GeminiSection,
    ) -> RequestRouter {
        let client = Client::new();
        RequestRouter::new(
            Arc::new(OllamaAdapter::new(
                client.clone(),
                &OllamaSection {
                    base_url: ollama_url.to_string(),
                    default_model: "phi3:mini".to_string(),
                },
            )),
            Arc::new(GroqAdapter::new(client.clone(), &groq)),
            Arc::new(GeminiAdapter::new(client, &gemini)),
            Arc::new(MemoryStore::load(dir.join("memory.json"))),
            "phi3:mini",
        )
    }

    fn router(ollama_url: &str, dir: &std::path::Path) -> RequestRouter {
        router_with(
            dir,
            ollama_url,
            GroqSection {
                url: "http://127.0.0.1:9/unused".to_string(),
                api_key: None,
            },
            GeminiSection {
                base_url: "http://127.0.0.1:9".to_string(),
                api_key: None,
            },
        )
    }

    #[test]
    fn test_select_route() {
        assert_eq!(select_route("gemini-flash-latest"), Route::Gemini);
        assert_eq!(select_route("gemini"), Route::Gemini);
        assert_eq!(select_route("groq"), Route::Groq);
        assert_eq!(select_route("groq-mixtral-8x7b-32768"), Route::Groq);
        assert_eq!(select_route("llama-3.3-70b-versatile"), Route::Groq);
        assert_eq!(select_route("phi3:mini"), Route::Local);
        assert_eq!(select_route("local-model"), Route::Local);
        assert_eq!(select_route(""), Route::Local);
        assert_eq!(select_route("my-gemini"), Route::Local);
    }

    #[test]
    fn test_prepare_inserts_system_message_and_default_model() {
        let dir = tempfile::tempdir().unwrap();
        let r = router("http://127.0.0.1:9", dir.path());
        let req = r.prepare(ChatRequest::new("", vec![ChatMessage::user("hi")]));

        assert_eq!(req.model, "phi3:mini");
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert!(req.messages[0].content.contains("[PERSISTENT MEMORY]"));
        assert_eq!(req.messages[1], ChatMessage::user("hi"));
    }

    #[test]
    fn test_prepare_appends_to_existing_system_message() {
        let dir = tempfile::tempdir().unwrap();
        let r = router("http://127.0.0.1:9", dir.path());
        let req = r.prepare(ChatRequest::new(
            "groq",
            vec![ChatMessage::system("You are terse."), ChatMessage::user("hi")],
        ));

        assert_eq!(req.messages.len(), 2);
        assert!(req.messages[0].content.starts_with("You are terse."));
        assert!(req.messages[0].content.contains("[INSTRUCTIONS]"));
        assert_eq!(req.messages.iter().filter(|m| m.role == Role::System).count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_missing_credential_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let r = router("http://127.0.0.1:9", dir.path());
        let err = r
            .dispatch(ChatRequest::new("gemini-flash-latest", vec![ChatMessage::user("hi")]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::MissingCredential { backend: "gemini", .. }));
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_dispatch_local_non_streaming() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":{"role":"assistant","content":"Hi there"},"done":true,"prompt_eval_count":3,"eval_count":2}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let r = router(&server.url(), dir.path());
        match r.dispatch(ChatRequest::new("local-model", vec![ChatMessage::user("hi")])).await {
            Ok(Completion::Response(resp)) => {
                assert_eq!(resp.content(), "Hi there");
                assert_eq!(resp.model, "phi:latest");
                assert_eq!(resp.choices.len(), 1);
            }
            Ok(Completion::Stream(_)) => panic!("expected a complete response"),
            Err(e) => panic!("dispatch failed: {}", e),
        }
    }

    #[tokio::test]
    async fn test_dispatch_local_streaming_ends_with_done() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(concat!(
                "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
                "{\"message\":{\"content\":\"lo\"},\"done\":false}\n",
                "{\"message\":{\"content\":\"\"},\"done\":true}\n",
            ))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let r = router(&server.url(), dir.path());
        let mut req = ChatRequest::new("phi3:mini", vec![ChatMessage::user("hi")]);
        req.stream = true;

        let Ok(Completion::Stream(stream)) = r.dispatch(req).await else {
            panic!("expected a stream");
        };
        let frames: Vec<Bytes> = stream.body.map(|b| b.unwrap()).collect().await;
        let text: String = frames
            .iter()
            .map(|f| String::from_utf8(f.to_vec()).unwrap())
            .collect();
        assert!(text.ends_with("data: [DONE]\n\n"));
        assert_eq!(text.matches("[DONE]").count(), 1);
        assert_eq!(stream.transcript.await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_dispatch_groq_streaming_forwards_bytes_and_rebuilds_text() {
        let body = concat!(
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"Sure \"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"[NEWS: \\\"ai\\\"]\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/openai/v1/chat/completions")
            .match_header("authorization", "Bearer gk")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "llama-3.3-70b-versatile",
                "stream": true
            })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let r = router_with(
            dir.path(),
            "http://127.0.0.1:9",
            GroqSection {
                url: format!("{}/openai/v1/chat/completions", server.url()),
                api_key: Some("gk".to_string()),
            },
            GeminiSection::default(),
        );
        let mut req = ChatRequest::new("groq", vec![ChatMessage::user("news?")]);
        req.stream = true;

        let Ok(Completion::Stream(stream)) = r.dispatch(req).await else {
            panic!("expected a stream");
        };
        let forwarded: Vec<u8> = stream
            .body
            .map(|b| b.unwrap().to_vec())
            .collect::<Vec<_>>()
            .await
            .concat();
        mock.assert_async().await;
        assert_eq!(forwarded, body.as_bytes());
        assert_eq!(stream.transcript.await.unwrap(), "Sure [NEWS: \"ai\"]");
    }

    #[tokio::test]
    async fn test_dispatch_streaming_disconnect_skips_transcript() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(concat!(
                "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
                "{\"message\":{\"content\":\"lo\"},\"done\":false}\n",
                "{\"message\":{\"content\":\"\"},\"done\":true}\n",
            ))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let r = router(&server.url(), dir.path());
        let mut req = ChatRequest::new("phi3:mini", vec![ChatMessage::user("hi")]);
        req.stream = true;

        let Ok(Completion::Stream(ChatStream { mut body, transcript })) = r.dispatch(req).await else {
            panic!("expected a stream");
        };
        assert!(body.next().await.is_some());
        drop(body);
        assert!(transcript.await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_gemini_transport_error_hides_key() {
        let dir = tempfile::tempdir().unwrap();
        let r = router_with(
            dir.path(),
            "http://127.0.0.1:9",
            GroqSection::default(),
            GeminiSection {
                base_url: "http://127.0.0.1:9".to_string(),
                api_key: Some("SUPERSECRET123".to_string()),
            },
        );
        let err = r
            .dispatch(ChatRequest::new("gemini-flash-latest", vec![ChatMessage::user("hi")]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::Transport { backend: "gemini", .. }));
        assert!(!err.to_string().contains("SUPERSECRET123"));
    }

    #[tokio::test]
    async fn test_list_models_merges_virtual_models() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"phi3:mini"}]}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let models = router(&server.url(), dir.path()).list_models().await;
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "phi3:mini",
                "gemini-flash-latest",
                "groq-llama-3.3-70b-versatile",
                "groq-mixtral-8x7b-32768"
            ]
        );
    }

    #[tokio::test]
    async fn test_list_models_fallback_when_local_down() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/tags")
            .with_status(500)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let models = router(&server.url(), dir.path()).list_models().await;
        assert_eq!(models.len(), 3);
        assert_eq!(models[0].id, "phi:latest");
        assert_eq!(models[0].owned_by, "fallback");
    }
}
