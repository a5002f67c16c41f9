//! 工具指令解析
//!
//! 语法：`[TYPE: "argument"]`，TYPE ∈ {SEARCH, NEWS, IMAGE, MEMORY_SAVE}（区分大小写），
//! 冒号后可有空白，参数为非空且不含双引号的文本，右引号后紧跟 `]`。
//! 手写扫描器：从左到右、互不重叠，残缺或格式错误的标签直接跳过。

use std::fmt;
use std::ops::Range;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectiveKind {
    Search,
    News,
    Image,
    MemorySave,
}

impl DirectiveKind {
    const ALL: [DirectiveKind; 4] = [
        DirectiveKind::Search,
        DirectiveKind::News,
        DirectiveKind::Image,
        DirectiveKind::MemorySave,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            DirectiveKind::Search => "SEARCH",
            DirectiveKind::News => "NEWS",
            DirectiveKind::Image => "IMAGE",
            DirectiveKind::MemorySave => "MEMORY_SAVE",
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolDirective {
    pub kind: DirectiveKind,
    pub argument: String,
    /// 原文中的完整标签
    pub source_span: String,
    /// 标签在原文中的字节区间
    #[serde(skip)]
    pub range: Range<usize>,
}

/// 按出现顺序提取全部合法指令
pub fn parse_directives(text: &str) -> Vec<ToolDirective> {
    let mut directives = Vec::new();
    let mut pos = 0;
    while let Some(offset) = text[pos..].find('[') {
        let start = pos + offset;
        match match_at(text, start) {
            Some(directive) => {
                pos = directive.range.end;
                directives.push(directive);
            }
            None => pos = start + 1,
        }
    }
    directives
}

/// 尝试在 `start`（指向 `[`）处匹配一个完整标签
fn match_at(text: &str, start: usize) -> Option<ToolDirective> {
    let bytes = text.as_bytes();
    let after_bracket = &text[start + 1..];
    let kind = DirectiveKind::ALL
        .into_iter()
        .find(|k| after_bracket.starts_with(k.tag()))?;

    let mut i = start + 1 + kind.tag().len();
    if bytes.get(i) != Some(&b':') {
        return None;
    }
    i += 1;
    while bytes.get(i).is_some_and(|b| b.is_ascii_whitespace()) {
        i += 1;
    }
    if bytes.get(i) != Some(&b'"') {
        return None;
    }
    let arg_start = i + 1;
    let arg_end = arg_start + text.get(arg_start..)?.find('"')?;
    if arg_end == arg_start || bytes.get(arg_end + 1) != Some(&b']') {
        return None;
    }
    let end = arg_end + 2;

    Some(ToolDirective {
        kind,
        argument: text[arg_start..arg_end].to_string(),
        source_span: text[start..end].to_string(),
        range: start..end,
    })
}
