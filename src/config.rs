//! 网关配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NEXA__*` 覆盖（双下划线表示嵌套，如 `NEXA__SERVER__PORT=8080`），
//! 最后叠加约定俗成的凭证变量（GROQ_API_KEY、GEMINI_API_KEY 等）。凭证在启动时不校验，按请求惰性检查。

use std::path::PathBuf;

use serde::Deserialize;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub auth: AuthSection,
    pub rate_limit: RateLimitSection,
    pub memory: MemorySection,
    pub backends: BackendsSection,
    pub search: SearchSection,
    pub news: NewsSection,
    pub images: ImagesSection,
}

/// [server] 段：监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
        }
    }
}

/// [auth] 段：静态共享 key（x-api-key）与 Bearer JWT 密钥
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// 与请求头 x-api-key 比对；命中即放行，不再校验 Bearer
    pub api_key: Option<String>,
    /// HS256 JWT 密钥
    pub token_secret: String,
    /// 开发用固定 Bearer token（原样比对），默认关闭
    pub dev_token: Option<String>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            api_key: None,
            token_secret: "dev-secret".to_string(),
            dev_token: None,
        }
    }
}

/// [rate_limit] 段：固定窗口计数器
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub enabled: bool,
    pub window_secs: u64,
    pub max_requests: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            max_requests: 60,
        }
    }
}

/// [memory] 段：持久记忆文档路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub path: PathBuf,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/user_memory.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BackendsSection {
    pub ollama: OllamaSection,
    pub groq: GroqSection,
    pub gemini: GeminiSection,
}

/// [backends.ollama] 段：本地推理服务
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaSection {
    pub base_url: String,
    /// 请求未指定 model 时使用
    pub default_model: String,
}

impl Default for OllamaSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            default_model: "phi3:mini".to_string(),
        }
    }
}

/// [backends.groq] 段：OpenAI 兼容云端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GroqSection {
    pub url: String,
    pub api_key: Option<String>,
}

impl Default for GroqSection {
    fn default() -> Self {
        Self {
            url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            api_key: None,
        }
    }
}

/// [backends.gemini] 段：Google Generative Language API
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeminiSection {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for GeminiSection {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: None,
        }
    }
}

/// [search] 段：级联搜索引擎
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub duckduckgo_url: String,
    /// SearXNG 实例（按顺序尝试，首个成功即返回）
    pub searxng_instances: Vec<String>,
    /// 单个 SearXNG 实例的超时（秒）
    pub instance_timeout_secs: u64,
    /// 非主引擎的整体超时（秒）
    pub fallback_timeout_secs: u64,
    /// 主引擎超时（秒）；未设置时不限时
    pub primary_timeout_secs: Option<u64>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            duckduckgo_url: "https://html.duckduckgo.com/html/".to_string(),
            searxng_instances: vec![
                "https://searx.be/search".to_string(),
                "https://search.ononoki.org/search".to_string(),
            ],
            instance_timeout_secs: 3,
            fallback_timeout_secs: 8,
            primary_timeout_secs: None,
        }
    }
}

/// [news] 段：NewsAPI
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NewsSection {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Default for NewsSection {
    fn default() -> Self {
        Self {
            base_url: "https://newsapi.org/v2".to_string(),
            api_key: None,
        }
    }
}

/// [images] 段：Unsplash
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesSection {
    pub base_url: String,
    pub access_key: Option<String>,
}

impl Default for ImagesSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.unsplash.com".to_string(),
            access_key: None,
        }
    }
}

impl AppConfig {
    /// 用约定的环境变量覆盖凭证与本地服务地址（未设置的保持配置文件中的值）
    pub fn apply_env_credentials(&mut self) {
        self.apply_credentials_from(|name| std::env::var(name).ok());
    }

    fn apply_credentials_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GROQ_API_KEY") {
            self.backends.groq.api_key = Some(v);
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.backends.gemini.api_key = Some(v);
        }
        if let Some(v) = get("OLLAMA_URL") {
            // 兼容直接填写 /api/chat 完整地址的写法
            let base = v.trim_end_matches('/');
            self.backends.ollama.base_url = base.strip_suffix("/api/chat").unwrap_or(base).to_string();
        }
        if let Some(v) = get("NEWS_API_KEY") {
            self.news.api_key = Some(v);
        }
        if let Some(v) = get("UNSPLASH_ACCESS_KEY") {
            self.images.access_key = Some(v);
        }
        if let Some(v) = get("NEXA_API_KEY") {
            self.auth.api_key = Some(v);
        }
        if let Some(v) = get("NEXA_TOKEN_SECRET") {
            self.auth.token_secret = v;
        }
    }
}

/// 从 config 目录加载配置，环境变量 NEXA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 NEXA__*（双下划线表示嵌套键）
/// 4. 最后叠加 GROQ_API_KEY 等凭证变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NEXA")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.apply_env_credentials();
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 3002);
        assert_eq!(cfg.auth.token_secret, "dev-secret");
        assert!(cfg.auth.dev_token.is_none());
        assert_eq!(cfg.rate_limit.max_requests, 60);
        assert_eq!(cfg.backends.ollama.default_model, "phi3:mini");
        assert_eq!(cfg.search.searxng_instances.len(), 2);
        assert!(cfg.search.primary_timeout_secs.is_none());
    }

    #[test]
    fn test_credentials_overlay_ignores_blank_values() {
        let mut cfg = AppConfig::default();
        cfg.apply_credentials_from(|name| match name {
            "GROQ_API_KEY" => Some("gsk-test".to_string()),
            "GEMINI_API_KEY" => Some("   ".to_string()),
            "NEXA_TOKEN_SECRET" => Some("s3cret".to_string()),
            _ => None,
        });
        assert_eq!(cfg.backends.groq.api_key.as_deref(), Some("gsk-test"));
        assert!(cfg.backends.gemini.api_key.is_none());
        assert_eq!(cfg.auth.token_secret, "s3cret");
    }

    #[test]
    fn test_ollama_url_accepts_full_chat_endpoint() {
        let mut cfg = AppConfig::default();
        cfg.apply_credentials_from(|name| {
            (name == "OLLAMA_URL").then(|| "http://gpu-box:11434/api/chat".to_string())
        });
        assert_eq!(cfg.backends.ollama.base_url, "http://gpu-box:11434");
    }

    #[test]
    fn test_load_from_explicit_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            "[server]\nport = 8088\n\n[search]\nsearxng_instances = [\"http://127.0.0.1:9/search\"]\n",
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.server.port, 8088);
        assert_eq!(cfg.search.searxng_instances, vec!["http://127.0.0.1:9/search"]);
        assert_eq!(cfg.server.host, "0.0.0.0");
    }
}
