//! 跨会话持久记忆
//!
//! 进程内唯一权威副本：启动时加载一次，每次变更立即整体写回 JSON 文件。
//! 写盘失败只记录日志，内存副本继续生效。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 事实列表上限；超出时淘汰最早的一条
pub const MAX_FACTS: usize = 50;

/// 注入系统提示时展示的最近事实条数
const CONTEXT_FACTS: usize = 5;

const DEFAULT_USER_NAME: &str = "User";

const INSTRUCTIONS: &str = "[INSTRUCTIONS]
You are Nexa, an intelligent OS assistant.
- You have access to the above MEMORY. Use it to personalize answers.
- If the user tells you a new name, preference, or important fact, output a tool call: [MEMORY_SAVE: \"the fact to save\"]
- If you need to search the web, output: [SEARCH: \"query\"]
- If you need news, output: [NEWS: \"topic\"]
- If you need images, output: [IMAGE: \"query\"]
";

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory file io: {0}")]
    Io(#[from] std::io::Error),

    #[error("memory file format: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub preferences: BTreeMap<String, Value>,
    #[serde(default)]
    pub notes: Vec<String>,
}

fn default_name() -> String {
    DEFAULT_USER_NAME.to_string()
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            name: default_name(),
            preferences: BTreeMap::new(),
            notes: Vec::new(),
        }
    }
}

/// 持久化文档（snake_case JSON）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    #[serde(default)]
    pub user_profile: UserProfile,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub last_interaction: Option<DateTime<Utc>>,
}

pub struct MemoryStore {
    path: PathBuf,
    doc: Mutex<MemoryDocument>,
}

impl MemoryStore {
    /// 启动时加载；文件缺失或损坏时使用默认文档并立即写回
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let (doc, fresh) = match read_document(&path) {
            Ok(Some(doc)) => (doc, false),
            Ok(None) => {
                tracing::info!(path = %path.display(), "memory file not found, creating default");
                (MemoryDocument::default(), true)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "memory file unreadable, starting from default");
                (MemoryDocument::default(), true)
            }
        };

        let store = Self {
            path,
            doc: Mutex::new(doc),
        };
        if fresh {
            let guard = store.lock();
            store.persist(&guard);
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, MemoryDocument> {
        self.doc.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 持锁写盘，保证多次变更按顺序落盘
    fn persist(&self, doc: &MemoryDocument) {
        if let Err(e) = write_document(&self.path, doc) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to persist memory");
        }
    }

    /// 注入系统消息的记忆块：姓名、偏好、最近 5 条事实，以及指令说明
    pub fn context_string(&self) -> String {
        let doc = self.lock();
        let profile = &doc.user_profile;
        let name = if profile.name.trim().is_empty() {
            DEFAULT_USER_NAME
        } else {
            profile.name.as_str()
        };
        let preferences = serde_json::to_string(&profile.preferences).unwrap_or_else(|_| "{}".to_string());

        let start = doc.facts.len().saturating_sub(CONTEXT_FACTS);
        let facts = if doc.facts.is_empty() {
            "- (none yet)".to_string()
        } else {
            doc.facts[start..]
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "\n[PERSISTENT MEMORY]\nUser Name: {}\nPreferences: {}\nRecent Key Facts:\n{}\n-------------------\n{}",
            name, preferences, facts, INSTRUCTIONS
        )
    }

    /// 追加事实；完全相同（区分大小写）时不做任何事。返回是否新增
    pub fn add_fact(&self, fact: &str) -> bool {
        let mut doc = self.lock();
        if doc.facts.iter().any(|f| f == fact) {
            return false;
        }
        doc.facts.push(fact.to_string());
        if doc.facts.len() > MAX_FACTS {
            doc.facts.remove(0);
        }
        self.persist(&doc);
        tracing::info!(fact, "memory learned fact");
        true
    }

    /// `name` 更新姓名（字符串值取原文，其他值取 JSON 文本）；其余键写入 preferences
    pub fn update_profile(&self, key: &str, value: Value) {
        let mut doc = self.lock();
        if key == "name" {
            doc.user_profile.name = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
        } else {
            doc.user_profile.preferences.insert(key.to_string(), value);
        }
        self.persist(&doc);
    }

    pub fn add_note(&self, note: &str) {
        let mut doc = self.lock();
        doc.user_profile.notes.push(note.to_string());
        self.persist(&doc);
    }

    /// 记录最近一次交互时间
    pub fn record_interaction(&self) {
        let mut doc = self.lock();
        doc.last_interaction = Some(Utc::now());
        self.persist(&doc);
    }

    pub fn snapshot(&self) -> MemoryDocument {
        self.lock().clone()
    }
}

fn read_document(path: &Path) -> Result<Option<MemoryDocument>, MemoryError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

fn write_document(path: &Path, doc: &MemoryDocument) -> Result<(), MemoryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(doc)?)?;
    Ok(())
}
