//! 智能体运行时：工具指令解析与编排

pub mod directive;
pub mod orchestrator;

pub use directive::{parse_directives, DirectiveKind, ToolDirective};
pub use orchestrator::{Orchestrator, ToolOutcome, ToolOutput};
