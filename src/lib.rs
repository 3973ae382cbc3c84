//! 字幕卡拉OK标签扫描与模板渲染。
//!
//! [`karaoke::scan`] 把一行文本切分为带计时的音节，
//! [`karaoke::render`] 用 `$变量` 与 `%表达式%` 模板逐音节重写该行。

pub mod app_settings;
pub mod ass_file;
pub mod error;
pub mod karaoke;
pub mod logger;
pub mod types;

pub use error::{EvalErrorKind, KaraokeError, Result};
pub use types::{AssLine, KaraokeTagKind, LineClass, Syllable};
