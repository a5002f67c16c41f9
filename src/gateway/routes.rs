//! HTTP 处理函数
//!
//! 请求级错误统一渲染为 `{"error": "..."}`，状态码取自 GatewayError::status_code。

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::GatewayError;
use crate::gateway::state::AppState;
use crate::llm::{ChatRequest, ChatStream, Completion};
use crate::memory::MemoryDocument;

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// 解析 JSON 请求体；空体按默认值处理
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| GatewayError::BadRequest(format!("invalid JSON body: {}", e)))
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryBody {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FactBody {
    #[serde(default)]
    pub fact: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfileBody {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let request: ChatRequest = parse_body(&body)?;

    match state.router.dispatch(request).await? {
        Completion::Response(response) => {
            state.orchestrator.spawn_run(response.content().to_string());
            Ok(Json(response).into_response())
        }
        Completion::Stream(ChatStream { body, transcript }) => {
            state.orchestrator.spawn_after(transcript);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from_stream(body))
                .map_err(|e| GatewayError::Config(e.to_string()))
        }
    }
}

pub async fn web_search(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let QueryBody { query } = parse_body(&body)?;
    let query = query
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| GatewayError::BadRequest("Query required".to_string()))?;
    let results = state.search.search(&query).await;
    Ok(Json(json!({ "results": results })))
}

pub async fn news(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<Value>, GatewayError> {
    let QueryBody { query } = parse_body(&body)?;
    let results = state.news.headlines(query.as_deref()).await?;
    Ok(Json(json!({ "results": results })))
}

pub async fn image_search(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let QueryBody { query } = parse_body(&body)?;
    let results = state.images.search(query.as_deref()).await?;
    Ok(Json(json!({ "results": results })))
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let data = state.router.list_models().await;
    Json(json!({ "object": "list", "data": data }))
}

pub async fn get_memory(State(state): State<Arc<AppState>>) -> Json<MemoryDocument> {
    Json(state.memory.snapshot())
}

pub async fn add_fact(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<Value>, GatewayError> {
    let FactBody { fact } = parse_body(&body)?;
    let fact = fact.trim();
    if fact.is_empty() {
        return Err(GatewayError::BadRequest("fact required".to_string()));
    }
    let added = state.memory.add_fact(fact);
    let facts = state.memory.snapshot().facts.len();
    Ok(Json(json!({ "added": added, "facts": facts })))
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let ProfileBody { key, value } = parse_body(&body)?;
    let key = key.trim();
    if key.is_empty() {
        return Err(GatewayError::BadRequest("key required".to_string()));
    }
    if key == "name" && !value.is_string() {
        return Err(GatewayError::BadRequest("name must be a string".to_string()));
    }
    state.memory.update_profile(key, value);
    Ok(Json(json!({ "user_profile": state.memory.snapshot().user_profile })))
}
