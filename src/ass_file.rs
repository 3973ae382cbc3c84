//! ASS 字幕脚本的最小读写层，以及按样式批量套用卡拉OK模板的宏。

use once_cell::sync::Lazy;
use regex::Regex;

use crate::app_settings::TemplaterConfig;
use crate::error::{KaraokeError, Result};
use crate::karaoke::{RenderOutcome, render};
use crate::types::{AssLine, LineClass};

/// [Events] 中的 Dialogue 或 Comment 行，文本字段之前的部分整体保留
static ASS_EVENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?P<Prefix>(?P<Type>Comment|Dialogue):\s*",
        r"(?:[^,]*,){3}",      // Layer, Start, End
        r"(?P<Style>[^,]*),",  // 样式
        r"(?:[^,]*,){5})",     // Name, MarginL, MarginR, MarginV, Effect
        r"(?P<Text>.*)$"       // 文本内容
    ))
    .expect("编译 ASS_EVENT_REGEX 失败")
});

/// [V4+ Styles] 中的样式定义行
static ASS_STYLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Style:\s*(?P<Name>[^,]*),").expect("编译 ASS_STYLE_REGEX 失败"));

/// 已解析的字幕脚本。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssDocument {
    pub lines: Vec<AssLine>,
    line_ending: String,
    trailing_newline: bool,
}

fn parse_line(raw: &str) -> AssLine {
    if let Some(caps) = ASS_EVENT_REGEX.captures(raw) {
        let class = if &caps["Type"] == "Dialogue" {
            LineClass::Dialogue
        } else {
            LineClass::Comment
        };
        return AssLine {
            class,
            style: caps["Style"].trim().to_string(),
            text: caps["Text"].to_string(),
            karaoke: None,
            raw_prefix: caps["Prefix"].to_string(),
        };
    }

    let (class, style) = match ASS_STYLE_REGEX.captures(raw) {
        Some(caps) => (LineClass::Style, caps["Name"].trim().to_string()),
        None => (LineClass::Other, String::new()),
    };
    AssLine {
        class,
        style,
        text: raw.to_string(),
        karaoke: None,
        raw_prefix: String::new(),
    }
}

impl AssDocument {
    pub fn parse(content: &str) -> Self {
        let line_ending = if content.contains("\r\n") { "\r\n" } else { "\n" };
        let trailing_newline = content.ends_with('\n');
        let body = content
            .strip_suffix(line_ending)
            .or_else(|| content.strip_suffix('\n'))
            .unwrap_or(content);

        let lines = if content.is_empty() {
            Vec::new()
        } else {
            body.split('\n')
                .map(|raw| parse_line(raw.strip_suffix('\r').unwrap_or(raw)))
                .collect()
        };

        Self {
            lines,
            line_ending: line_ending.to_string(),
            trailing_newline,
        }
    }

    pub fn to_ass_string(&self) -> String {
        let mut out = self
            .lines
            .iter()
            .map(|line| format!("{}{}", line.raw_prefix, line.text))
            .collect::<Vec<_>>()
            .join(&self.line_ending);
        if self.trailing_newline {
            out.push_str(&self.line_ending);
        }
        out
    }

    /// 所有定义过的样式名。
    pub fn style_names(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|line| line.class == LineClass::Style)
            .map(|line| line.style.as_str())
            .collect()
    }

    /// 参与模板处理的行：Dialogue 行，且样式与过滤条件一致（过滤条件为空时匹配全部）。
    pub fn selected_lines_mut<'a>(
        &'a mut self,
        style_filter: &'a str,
    ) -> impl Iterator<Item = (usize, &'a mut AssLine)> + 'a {
        self.lines
            .iter_mut()
            .enumerate()
            .filter(move |(_, line)| is_selected(line, style_filter))
            .map(|(idx, line)| (idx + 1, line))
    }
}

fn is_selected(line: &AssLine, style_filter: &str) -> bool {
    line.is_dialogue() && (style_filter.is_empty() || line.style == style_filter)
}

/// 单行处理失败的记录，行号从 1 开始。
#[derive(Debug)]
pub struct LineFailure {
    pub line_number: usize,
    pub error: KaraokeError,
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub rendered: usize,
    pub skipped: usize,
    pub failures: Vec<LineFailure>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// 对文档中所有被选中的行套用模板。单行失败会被记录，不影响其余行。
pub fn apply_template(doc: &mut AssDocument, config: &TemplaterConfig) -> Result<ApplyReport> {
    let options = config.render_options()?;
    let mut report = ApplyReport::default();

    if !config.style.is_empty() && !doc.style_names().contains(&config.style.as_str()) {
        log::warn!("脚本中没有名为 '{}' 的样式", config.style);
    }

    for (line_number, line) in doc.selected_lines_mut(&config.style) {
        match render(line, &options) {
            Ok(RenderOutcome::Rendered { syllables }) => {
                log::debug!("第 {line_number} 行: 已渲染 {syllables} 个音节");
                report.rendered += 1;
            }
            Ok(RenderOutcome::NotKaraoke) => {
                log::debug!("第 {line_number} 行: 没有卡拉OK标签，跳过");
                report.skipped += 1;
            }
            Err(error) => {
                log::warn!("第 {line_number} 行处理失败: {error}");
                report.failures.push(LineFailure { line_number, error });
            }
        }
    }

    log::info!(
        "模板处理完成: 渲染 {} 行，跳过 {} 行，失败 {} 行",
        report.rendered,
        report.skipped,
        report.failures.len()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "[Script Info]\n\
ScriptType: v4.00+\n\
\n\
[V4+ Styles]\n\
Format: Name, Fontname, Fontsize\n\
Style: Default,Arial,20\n\
Style: Romaji,Arial,20\n\
\n\
[Events]\n\
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n\
Dialogue: 0,0:00:01.00,0:00:03.00,Romaji,,0,0,0,,{\\k50}Hel{\\k30}lo, world\n\
Dialogue: 0,0:00:04.00,0:00:05.00,Default,,0,0,0,,{\\k20}a\n\
Comment: 0,0:00:04.00,0:00:05.00,Romaji,,0,0,0,,{\\k20}comment\n\
Dialogue: 0,0:00:06.00,0:00:07.00,Romaji,,0,0,0,,no karaoke\n";

    #[test]
    fn test_round_trip() {
        let doc = AssDocument::parse(SAMPLE);
        assert_eq!(doc.to_ass_string(), SAMPLE);

        let crlf = SAMPLE.replace('\n', "\r\n");
        assert_eq!(AssDocument::parse(&crlf).to_ass_string(), crlf);

        let no_trailing = SAMPLE.trim_end();
        assert_eq!(AssDocument::parse(no_trailing).to_ass_string(), no_trailing);
        assert_eq!(AssDocument::parse("").to_ass_string(), "");
    }

    #[test]
    fn test_line_classification() {
        let doc = AssDocument::parse(SAMPLE);
        assert_eq!(doc.style_names(), vec!["Default", "Romaji"]);

        let event = &doc.lines[10];
        assert_eq!(event.class, LineClass::Dialogue);
        assert_eq!(event.style, "Romaji");
        assert_eq!(event.text, r"{\k50}Hel{\k30}lo, world");
        assert_eq!(doc.lines[12].class, LineClass::Comment);
        assert_eq!(doc.lines[0].class, LineClass::Other);
    }

    #[test]
    fn test_apply_template_with_style_filter() {
        let mut doc = AssDocument::parse(SAMPLE);
        let config = TemplaterConfig {
            template: "%$start%".to_string(),
            style: "Romaji".to_string(),
            ..Default::default()
        };

        let report = apply_template(&mut doc, &config).unwrap();
        assert_eq!(report.rendered, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.is_success());

        assert_eq!(doc.lines[10].text, r"{\0}Hel{\500}lo, world");
        assert_eq!(doc.lines[11].text, r"{\k20}a");
        assert_eq!(doc.lines[12].text, r"{\k20}comment");
        assert!(
            doc.to_ass_string()
                .contains(r"Dialogue: 0,0:00:01.00,0:00:03.00,Romaji,,0,0,0,,{\0}Hel{\500}lo, world")
        );
    }

    #[test]
    fn test_empty_style_filter_matches_all_dialogue() {
        let mut doc = AssDocument::parse(SAMPLE);
        let config = TemplaterConfig {
            template: "$text".to_string(),
            strip: true,
            ..Default::default()
        };

        let report = apply_template(&mut doc, &config).unwrap();
        assert_eq!(report.rendered, 2);
        assert_eq!(doc.lines[11].text, "{a}a");
    }

    #[test]
    fn test_failed_line_does_not_stop_others() {
        let content = "Dialogue: 0,0:00:00.00,0:00:01.00,Default,,0,0,0,,{\\k0}x\n\
Dialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,{\\k10}y\n";
        let mut doc = AssDocument::parse(content);
        let config = TemplaterConfig {
            template: "%100 / $dur%".to_string(),
            strip: true,
            ..Default::default()
        };

        let report = apply_template(&mut doc, &config).unwrap();
        assert_eq!(report.rendered, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].line_number, 1);
        assert_eq!(doc.lines[0].text, r"{\k0}x");
        assert_eq!(doc.lines[1].text, "{10}y");
    }

    #[test]
    fn test_invalid_pattern_fails_whole_run() {
        let mut doc = AssDocument::parse(SAMPLE);
        let config = TemplaterConfig {
            tag_pattern: "(".to_string(),
            ..Default::default()
        };
        assert!(apply_template(&mut doc, &config).is_err());
    }
}
