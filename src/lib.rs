//! Nexa - 统一 LLM 网关与智能体运行时
//!
//! 模块划分：
//! - **agent**: 工具指令解析与编排（搜索 / 新闻 / 图片 / 记忆写入）
//! - **config**: 应用配置加载（TOML + 环境变量 + 凭证变量）
//! - **core**: 请求级错误类型
//! - **gateway**: axum HTTP 入口（鉴权、限流、路由）
//! - **llm**: 规范协议、三个后端适配器、流式翻译与请求路由
//! - **memory**: 跨会话持久记忆
//! - **observability**: 日志初始化
//! - **tools**: 级联网页搜索、新闻、图片服务

pub mod agent;
pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use crate::config::{load_config, AppConfig};
pub use crate::core::GatewayError;
