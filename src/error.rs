use std::io;

use thiserror::Error;

/// 模板表达式求值失败的具体原因。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalErrorKind {
    #[error("未知的标识符 '{0}'")]
    UnknownIdentifier(String),
    #[error("除数为零")]
    DivisionByZero,
    #[error("整数运算溢出")]
    Overflow,
    #[error("运算符 '{op}' 不能用于 {lhs} 与 {rhs}")]
    TypeMismatch {
        op: char,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("语法错误 (位置 {position}): {message}")]
    Syntax { position: usize, message: String },
}

/// 卡拉OK扫描与模板渲染过程中可能发生的错误。
#[derive(Debug, Error)]
pub enum KaraokeError {
    /// 卡拉OK标签的时长不是合法的非负整数。
    #[error("无效的卡拉OK标签 '{tag}' (字节位置 {position})")]
    MalformedTag { tag: String, position: usize },

    /// `%...%` 表达式无法求值，整行渲染失败。
    #[error("第 {syllable_index} 个音节的表达式 '{expression}' 求值失败: {reason}")]
    Evaluation {
        syllable_index: usize,
        expression: String,
        #[source]
        reason: EvalErrorKind,
    },

    /// 用户提供的标签匹配正则无法编译。
    #[error("无效的标签匹配模式: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("无效的配置: {0}")]
    InvalidConfig(String),

    #[error("IO 错误: {0}")]
    Io(#[from] io::Error),

    #[error("配置文件错误: {0}")]
    Settings(#[from] ini::Error),
}

pub type Result<T> = std::result::Result<T, KaraokeError>;
