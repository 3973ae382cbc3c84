//! 卡拉OK标签扫描器

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{KaraokeError, Result};
use crate::types::{AssLine, KaraokeTagKind, Syllable};

/// 一个完整的覆盖标签块 `{...}`
static OVERRIDE_BLOCK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^}]*\}").expect("编译 OVERRIDE_BLOCK_REGEX 失败"));

/// 块内的卡拉OK标签及其参数，参数在下一个 `\` 或块结尾处截止
static KARAOKE_TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(kf|ko|kt|k|K)([^\\}]*)").expect("编译 KARAOKE_TAG_REGEX 失败")
});

/// 绘图模式标签 `\p<N>`，`N > 0` 进入绘图模式，`\p0` 退出
static DRAWING_MODE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\p(\d+)").expect("编译 DRAWING_MODE_REGEX 失败"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    AwaitingTag,
    InSyllable,
}

/// 返回行的音节列表。已有非空缓存时直接复用，否则解析文本并写入缓存。
pub fn scan(line: &mut AssLine) -> Result<&[Syllable]> {
    let needs_parse = line.karaoke.as_ref().is_none_or(Vec::is_empty);
    if needs_parse {
        let syllables = parse_karaoke_text(&line.text)?;
        log::trace!("扫描到 {} 个音节: {}", syllables.len(), line.text);
        line.karaoke = Some(syllables);
    }
    Ok(line.karaoke.as_deref().unwrap_or_default())
}

/// 将一行文本切分为卡拉OK音节。
///
/// 没有任何卡拉OK标签的文本返回空列表；第一个卡拉OK标签之前的内容被丢弃。
pub fn parse_karaoke_text(text: &str) -> Result<Vec<Syllable>> {
    let mut syllables: Vec<Syllable> = Vec::new();
    let mut state = ScanState::AwaitingTag;
    let mut clock_ms: u64 = 0;
    let mut drawing = false;

    let blocks: Vec<_> = OVERRIDE_BLOCK_REGEX.find_iter(text).collect();
    for (idx, block) in blocks.iter().enumerate() {
        let run_end = blocks.get(idx + 1).map_or(text.len(), |next| next.start());
        let trailing = &text[block.end()..run_end];
        drawing = drawing_mode_after(block.as_str(), drawing);

        if let Some((tag_kind, duration)) = find_karaoke_tag(block.as_str(), block.start())? {
            let start_time = clock_ms;
            let recorded_duration = if tag_kind == KaraokeTagKind::Kt {
                clock_ms = u64::from(duration) * 10;
                0
            } else {
                clock_ms += u64::from(duration) * 10;
                duration
            };

            syllables.push(Syllable {
                start_time,
                end_time: clock_ms,
                duration: recorded_duration,
                tag_kind,
                text: text[block.start()..run_end].to_string(),
                text_stripped: if drawing {
                    String::new()
                } else {
                    trailing.to_string()
                },
            });
            state = ScanState::InSyllable;
            continue;
        }

        match state {
            ScanState::AwaitingTag => {
                log::trace!("丢弃首个卡拉OK标签之前的标签块: {}", block.as_str());
            }
            ScanState::InSyllable => {
                if let Some(current) = syllables.last_mut() {
                    current.text.push_str(&text[block.start()..run_end]);
                    if !drawing {
                        current.text_stripped.push_str(trailing);
                    }
                }
            }
        }
    }

    Ok(syllables)
}

/// 第一个卡拉OK标签块之前的内容，这部分不属于任何音节。
pub fn leading_content(text: &str) -> &str {
    OVERRIDE_BLOCK_REGEX
        .find_iter(text)
        .find(|block| KARAOKE_TAG_REGEX.is_match(block.as_str()))
        .map_or("", |block| &text[..block.start()])
}

/// 去掉所有标签块和绘图内容，只留下纯文本。
pub fn plain_text(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut drawing = false;
    let mut last = 0;
    for block in OVERRIDE_BLOCK_REGEX.find_iter(text) {
        if !drawing {
            plain.push_str(&text[last..block.start()]);
        }
        drawing = drawing_mode_after(block.as_str(), drawing);
        last = block.end();
    }
    if !drawing {
        plain.push_str(&text[last..]);
    }
    plain
}

/// 绘图模式一直持续到 `\p0`，块内最后一个 `\p` 标签决定块后的状态。
fn drawing_mode_after(block: &str, drawing: bool) -> bool {
    DRAWING_MODE_REGEX
        .captures_iter(block)
        .last()
        .and_then(|caps| caps.get(1))
        .map_or(drawing, |level| level.as_str().bytes().any(|b| b != b'0'))
}

/// 在一个标签块中查找第一个卡拉OK标签，返回其种类与厘秒时长。
fn find_karaoke_tag(block: &str, offset: usize) -> Result<Option<(KaraokeTagKind, u32)>> {
    let Some(caps) = KARAOKE_TAG_REGEX.captures(block) else {
        return Ok(None);
    };
    let (Some(whole), Some(name), Some(arg)) = (caps.get(0), caps.get(1), caps.get(2)) else {
        return Ok(None);
    };

    let malformed = || KaraokeError::MalformedTag {
        tag: whole.as_str().to_string(),
        position: offset + whole.start(),
    };
    let tag_kind = KaraokeTagKind::from_tag_name(name.as_str()).ok_or_else(malformed)?;
    let arg = arg.as_str();
    if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let duration: u32 = arg.parse().map_err(|_| malformed())?;

    Ok(Some((tag_kind, duration)))
}
