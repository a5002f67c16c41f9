//! LLM 层：规范协议、三个后端适配器、流式翻译与路由

pub mod gemini;
pub mod groq;
pub mod ollama;
pub mod router;
pub mod stream;
pub mod traits;
pub mod types;

pub use gemini::GeminiAdapter;
pub use groq::GroqAdapter;
pub use ollama::OllamaAdapter;
pub use router::{select_route, Completion, RequestRouter, Route};
pub use stream::{ChatStream, ChunkContext, ChunkOutcome, StreamEvent};
pub use traits::{BackendAdapter, ProviderReply, ProviderRequest, StreamMode};
pub use types::{CanonicalChunk, CanonicalResponse, ChatMessage, ChatRequest, ModelInfo, Role, Usage};
