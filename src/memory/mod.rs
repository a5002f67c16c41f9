//! 记忆层：跨会话持久记忆（用户画像 + 事实列表）

pub mod store;

pub use store::{MemoryDocument, MemoryError, MemoryStore, UserProfile, MAX_FACTS};
