//! 外部工具服务：级联网页搜索、新闻、图片

pub mod images;
pub mod news;
pub mod search;

pub use images::{ImageResult, ImageService, DEFAULT_IMAGE_QUERY};
pub use news::{NewsResult, NewsService};
pub use search::{
    parse_duckduckgo_html, DuckDuckGoEngine, SearchEngine, SearchError, SearchResult, SearxngEngine,
    WebSearchService,
};
