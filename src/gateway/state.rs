//! 网关共享状态：由配置一次性构建，所有请求共享

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::agent::Orchestrator;
use crate::config::AppConfig;
use crate::core::GatewayError;
use crate::gateway::rate_limit::FixedWindowLimiter;
use crate::llm::RequestRouter;
use crate::memory::MemoryStore;
use crate::tools::{ImageService, NewsService, WebSearchService};

pub struct AppState {
    pub config: AppConfig,
    pub router: RequestRouter,
    pub memory: Arc<MemoryStore>,
    pub search: Arc<WebSearchService>,
    pub news: Arc<NewsService>,
    pub images: Arc<ImageService>,
    pub orchestrator: Arc<Orchestrator>,
    pub limiter: FixedWindowLimiter,
}

impl AppState {
    /// 加载记忆文件并构建全部后端与工具服务（共享同一个 HTTP 连接池）
    pub fn from_config(config: AppConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Config(format!("http client: {}", e)))?;

        let memory = Arc::new(MemoryStore::load(&config.memory.path));
        let search = Arc::new(WebSearchService::from_config(client.clone(), &config.search));
        let news = Arc::new(NewsService::new(client.clone(), &config.news));
        let images = Arc::new(ImageService::new(client.clone(), &config.images));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&memory),
            Arc::clone(&search),
            Arc::clone(&news),
            Arc::clone(&images),
        ));
        let router = RequestRouter::from_config(client, &config, Arc::clone(&memory));
        let limiter = FixedWindowLimiter::new(
            Duration::from_secs(config.rate_limit.window_secs),
            config.rate_limit.max_requests,
        );

        tracing::info!(
            memory = %memory.path().display(),
            default_model = %config.backends.ollama.default_model,
            groq = config.backends.groq.api_key.is_some(),
            gemini = config.backends.gemini.api_key.is_some(),
            "gateway state ready"
        );

        Ok(Self {
            config,
            router,
            memory,
            search,
            news,
            images,
            orchestrator,
            limiter,
        })
    }
}
