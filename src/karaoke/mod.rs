//! 卡拉OK标签扫描与模板渲染。

pub mod expression;
pub mod scanner;
pub mod template;

pub use scanner::{parse_karaoke_text, scan};
pub use template::{
    CompiledTemplate, DEFAULT_TAG_PATTERN, RenderOptions, RenderOutcome, TemplateVariable, render,
};
