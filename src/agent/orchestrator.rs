//! 智能体编排：扫描一轮完整输出中的工具指令并依次执行
//!
//! 工具结果只记录日志并返回，不回写本轮响应；流式轮次仅在上游正常关闭、全文就绪后执行。

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::agent::directive::{parse_directives, DirectiveKind, ToolDirective};
use crate::core::GatewayError;
use crate::memory::MemoryStore;
use crate::tools::{ImageResult, ImageService, NewsResult, NewsService, SearchResult, WebSearchService};

/// 单个工具的执行产物
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Search(Vec<SearchResult>),
    News(Vec<NewsResult>),
    Images(Vec<ImageResult>),
    /// added = false 表示事实已存在
    MemorySaved { added: bool },
}

#[derive(Debug)]
pub struct ToolOutcome {
    pub directive: ToolDirective,
    pub result: Result<ToolOutput, GatewayError>,
}

pub struct Orchestrator {
    memory: Arc<MemoryStore>,
    search: Arc<WebSearchService>,
    news: Arc<NewsService>,
    images: Arc<ImageService>,
}

impl Orchestrator {
    pub fn new(
        memory: Arc<MemoryStore>,
        search: Arc<WebSearchService>,
        news: Arc<NewsService>,
        images: Arc<ImageService>,
    ) -> Self {
        Self {
            memory,
            search,
            news,
            images,
        }
    }

    /// 按出现顺序串行执行全部指令；单个工具失败不影响后续工具。结束后记录交互时间
    pub async fn run(&self, text: &str) -> Vec<ToolOutcome> {
        let directives = parse_directives(text);
        let mut outcomes = Vec::with_capacity(directives.len());

        for directive in directives {
            tracing::info!(tool = %directive.kind, argument = %directive.argument, "executing tool directive");
            let result = self.execute(&directive).await;
            match &result {
                Ok(output) => tracing::info!(tool = %directive.kind, summary = %summarize(output), "tool finished"),
                Err(e) => tracing::warn!(tool = %directive.kind, error = %e, "tool failed"),
            }
            outcomes.push(ToolOutcome { directive, result });
        }

        self.memory.record_interaction();
        outcomes
    }

    async fn execute(&self, directive: &ToolDirective) -> Result<ToolOutput, GatewayError> {
        let arg = directive.argument.as_str();
        match directive.kind {
            DirectiveKind::MemorySave => Ok(ToolOutput::MemorySaved {
                added: self.memory.add_fact(arg),
            }),
            DirectiveKind::Search => Ok(ToolOutput::Search(self.search.search(arg).await)),
            DirectiveKind::News => self.news.headlines(Some(arg)).await.map(ToolOutput::News),
            DirectiveKind::Image => self.images.search(Some(arg)).await.map(ToolOutput::Images),
        }
    }

    /// 全文就绪后在后台执行；发送端被丢弃（客户端断开或上游异常）时不做任何事
    pub fn spawn_after(self: &Arc<Self>, transcript: oneshot::Receiver<String>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match transcript.await {
                Ok(text) => {
                    let outcomes = this.run(&text).await;
                    tracing::debug!(tools = outcomes.len(), "orchestration pass complete");
                }
                Err(_) => tracing::debug!("turn ended without a complete transcript, skipping tool scan"),
            }
        })
    }

    /// 非流式轮次：文本已完整，直接在后台执行，不阻塞响应
    pub fn spawn_run(self: &Arc<Self>, text: String) -> JoinHandle<()> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(text);
        self.spawn_after(rx)
    }
}

fn summarize(output: &ToolOutput) -> String {
    match output {
        ToolOutput::Search(r) => format!("{} search results", r.len()),
        ToolOutput::News(r) => format!("{} articles", r.len()),
        ToolOutput::Images(r) => format!("{} images", r.len()),
        ToolOutput::MemorySaved { added } => format!("memory saved (new: {})", added),
    }
}
