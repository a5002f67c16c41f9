//! 网关错误类型
//!
//! 请求级错误统一为 GatewayError：配置错误（缺凭证）在任何网络调用之前抛出；
//! 上游错误携带后端名与状态码；其余为入口层的请求错误、鉴权失败与限流。
//! 单行解析失败、单个搜索引擎失败、记忆持久化失败均不在此列（在各自模块内记录日志后吞掉）。

use thiserror::Error;

/// 请求级错误：网关向调用方返回结构化错误对象
#[derive(Error, Debug)]
pub enum GatewayError {
    /// 所选后端缺少必需凭证（如 GROQ_API_KEY），不会静默路由到其它后端
    #[error("{var} is not configured for backend {backend}")]
    MissingCredential {
        backend: &'static str,
        var: &'static str,
    },

    #[error("Config error: {0}")]
    Config(String),

    /// 上游返回非 2xx
    #[error("{backend} API error: {status} - {message}")]
    Upstream {
        backend: &'static str,
        status: u16,
        message: String,
    },

    /// 网络层失败（连接、读取响应体、解码）
    #[error("{backend} transport error: {message}")]
    Transport {
        backend: &'static str,
        message: String,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Too many requests")]
    RateLimited,
}

impl GatewayError {
    pub fn transport(backend: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            backend,
            message: err.to_string(),
        }
    }

    /// reqwest 错误去掉请求 URL 后再格式化（URL 中可能带查询参数凭证）
    pub fn http(backend: &'static str, err: reqwest::Error) -> Self {
        Self::transport(backend, err.without_url())
    }

    /// 对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingCredential { .. } | Self::Config(_) => 500,
            Self::Upstream { .. } | Self::Transport { .. } => 502,
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::RateLimited => 429,
        }
    }
}
