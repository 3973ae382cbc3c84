use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// 字幕行的类别。只有 `Dialogue` 行参与卡拉OK模板处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LineClass {
    Dialogue,
    Comment,
    Style,
    #[default]
    Other,
}

/// 卡拉OK计时标签的种类。
///
/// `\K` 是 `\kf` 的旧写法，扫描时会被归一化为 `Kf`。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum KaraokeTagKind {
    #[default]
    K,
    Kf,
    Ko,
    Kt,
}

impl KaraokeTagKind {
    /// 从标签名（不含反斜杠）解析，`K` 视为 `kf`。
    pub fn from_tag_name(name: &str) -> Option<Self> {
        match name {
            "k" => Some(Self::K),
            "K" | "kf" => Some(Self::Kf),
            "ko" => Some(Self::Ko),
            "kt" => Some(Self::Kt),
            _ => None,
        }
    }
}

/// 一个带有计时信息的卡拉OK音节。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Syllable {
    /// 相对于行开始的毫秒数。
    pub start_time: u64,
    pub end_time: u64,
    /// 标签中的原始时长，单位为厘秒。`\kt` 音节恒为 0。
    pub duration: u32,
    pub tag_kind: KaraokeTagKind,
    /// 标签块及其后的全部文本，包括嵌套的其他标签。
    pub text: String,
    /// 去除标签后的纯文本，不含绘图模式的内容。
    pub text_stripped: String,
}

impl Syllable {
    pub fn duration_ms(&self) -> u64 {
        u64::from(self.duration) * 10
    }

    /// 音节中点，`start_time + duration * 5`。
    pub fn mid_time(&self) -> u64 {
        self.start_time + u64::from(self.duration) * 5
    }
}

/// 一行字幕。由外部的文档层持有，卡拉OK模块只读写 `text` 与 `karaoke` 缓存。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssLine {
    pub class: LineClass,
    pub style: String,
    pub text: String,
    /// 该行的音节缓存，修改 `text` 后必须清空。
    pub karaoke: Option<Vec<Syllable>>,
    /// 事件行中文本字段之前的部分，例如 `Dialogue: 0,0:00:01.00,0:00:03.00,Default,,0,0,0,,`。
    /// 非事件行保存整行原文。
    pub raw_prefix: String,
}

impl AssLine {
    /// 创建一个没有原始前缀的对话行，便于测试与宿主程序直接构造。
    pub fn dialogue(style: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            class: LineClass::Dialogue,
            style: style.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn is_dialogue(&self) -> bool {
        self.class == LineClass::Dialogue
    }

    pub fn invalidate_karaoke(&mut self) {
        self.karaoke = None;
    }
}
