//! 核心层：网关错误分类

pub mod error;

pub use error::GatewayError;
