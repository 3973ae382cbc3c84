//! 卡拉OK模板求值器

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

use crate::error::{EvalErrorKind, KaraokeError, Result};
use crate::karaoke::expression::{self, Bindings, Value};
use crate::karaoke::scanner::{leading_content, plain_text, scan};
use crate::types::{AssLine, Syllable};

/// 默认的就地替换模式：任意卡拉OK计时标签（不含反斜杠）
pub const DEFAULT_TAG_PATTERN: &str = r"(?:K|k[fot]?)\d+";

static DEFAULT_TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_TAG_PATTERN).expect("编译 DEFAULT_TAG_REGEX 失败"));

/// 模板中的 `$变量` 引用
static TEMPLATE_VARIABLE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(start|end|dur|mid|text|kind|i)\b")
        .expect("编译 TEMPLATE_VARIABLE_REGEX 失败")
});

/// 模板可以引用的音节变量。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateVariable {
    Start,
    End,
    Dur,
    Mid,
    Text,
    Index,
    Kind,
}

impl TemplateVariable {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            "dur" => Some(Self::Dur),
            "mid" => Some(Self::Mid),
            "text" => Some(Self::Text),
            "i" => Some(Self::Index),
            "kind" => Some(Self::Kind),
            _ => None,
        }
    }

    fn from_internal_name(name: &str) -> Option<Self> {
        name.strip_prefix('_').and_then(Self::from_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Variable(TemplateVariable),
}

/// 预先改写过一次的模板，可对每个音节重复求值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    source: String,
    parts: Vec<TemplatePart>,
}

impl CompiledTemplate {
    pub fn compile(template: &str) -> Self {
        let mut parts = Vec::new();
        let mut last = 0;
        for caps in TEMPLATE_VARIABLE_REGEX.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(variable) = TemplateVariable::from_name(name.as_str()) else {
                continue;
            };
            if whole.start() > last {
                parts.push(TemplatePart::Literal(template[last..whole.start()].to_string()));
            }
            parts.push(TemplatePart::Variable(variable));
            last = whole.end();
        }
        if last < template.len() {
            parts.push(TemplatePart::Literal(template[last..].to_string()));
        }

        Self {
            source: template.to_string(),
            parts,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 对单个音节求值：先代入变量，再计算结果中的 `%...%` 表达式。
    pub fn evaluate(&self, syllable: &Syllable, index: usize) -> Result<String> {
        let bindings = SyllableBindings { syllable, index };

        let mut substituted = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => substituted.push_str(text),
                TemplatePart::Variable(var) => {
                    substituted.push_str(&bindings.value(*var).to_string());
                }
            }
        }

        expand_expressions(&substituted, &bindings).map_err(|(expression, reason)| {
            KaraokeError::Evaluation {
                syllable_index: index,
                expression,
                reason,
            }
        })
    }
}

struct SyllableBindings<'a> {
    syllable: &'a Syllable,
    index: usize,
}

impl SyllableBindings<'_> {
    fn value(&self, var: TemplateVariable) -> Value {
        let syl = self.syllable;
        match var {
            TemplateVariable::Start => Value::Int(syl.start_time as i64),
            TemplateVariable::End => Value::Int(syl.end_time as i64),
            TemplateVariable::Dur => Value::Int(i64::from(syl.duration)),
            TemplateVariable::Mid => Value::Int(syl.mid_time() as i64),
            TemplateVariable::Text => Value::Str(syl.text_stripped.clone()),
            TemplateVariable::Index => Value::Int(self.index as i64),
            TemplateVariable::Kind => Value::Str(syl.tag_kind.to_string()),
        }
    }
}

impl Bindings for SyllableBindings<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        TemplateVariable::from_internal_name(name).map(|var| self.value(var))
    }
}

/// 替换文本中所有 `%...%` 片段。`%%` 输出一个 `%`，未闭合的 `%` 原样保留。
fn expand_expressions(
    input: &str,
    bindings: &SyllableBindings<'_>,
) -> std::result::Result<String, (String, EvalErrorKind)> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find('%') {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('%') else {
            output.push_str(&rest[open..]);
            return Ok(output);
        };

        let expression = &after_open[..close];
        if expression.is_empty() {
            output.push('%');
        } else {
            let value = expression::evaluate(expression, bindings)
                .map_err(|reason| (expression.to_string(), reason))?;
            output.push_str(&value.to_string());
        }
        rest = &after_open[close + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

/// 单行渲染的参数。
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub template: String,
    pub strip: bool,
    /// 非 strip 模式下，每个音节中被替换的第一个匹配。
    pub tag_pattern: Regex,
}

impl RenderOptions {
    pub fn new(template: impl Into<String>, strip: bool) -> Self {
        Self {
            template: template.into(),
            strip,
            tag_pattern: DEFAULT_TAG_REGEX.clone(),
        }
    }

    pub fn with_tag_pattern(mut self, pattern: &str) -> Result<Self> {
        self.tag_pattern = Regex::new(pattern)?;
        Ok(self)
    }
}

/// 单行渲染的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// 该行没有卡拉OK标签，未做任何修改。
    NotKaraoke,
    Rendered { syllables: usize },
}

/// 用模板重写一行的每个音节。
///
/// 第一个卡拉OK标签之前的内容保留在输出开头，strip 模式下只保留其中的纯文本。
/// 任意音节的表达式求值失败时整行失败，行文本与音节缓存保持不变。
/// 成功后写回新文本并清空音节缓存。
pub fn render(line: &mut AssLine, options: &RenderOptions) -> Result<RenderOutcome> {
    let leading = leading_content(&line.text);
    let mut output = if options.strip {
        plain_text(leading)
    } else {
        leading.to_string()
    };

    let syllables = scan(line)?;
    if syllables.is_empty() {
        return Ok(RenderOutcome::NotKaraoke);
    }

    let template = CompiledTemplate::compile(&options.template);

    for (index, syllable) in syllables.iter().enumerate() {
        let rendered = template.evaluate(syllable, index)?;
        if options.strip {
            output.push('{');
            output.push_str(&rendered);
            output.push('}');
            output.push_str(&syllable.text_stripped);
        } else {
            let replaced = options
                .tag_pattern
                .replace(&syllable.text, NoExpand(&rendered));
            output.push_str(&replaced);
        }
    }

    let count = syllables.len();
    log::debug!("模板 '{}' 渲染了 {count} 个音节", template.source());
    line.text = output;
    line.invalidate_karaoke();

    Ok(RenderOutcome::Rendered { syllables: count })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_text(text: &str, template: &str, strip: bool) -> Result<String> {
        let mut line = AssLine::dialogue("Default", text);
        render(&mut line, &RenderOptions::new(template, strip))?;
        Ok(line.text)
    }

    #[test]
    fn test_start_expression_in_place() {
        assert_eq!(
            render_text(r"{\k50}Hel{\k30}lo", "%$start%", false).unwrap(),
            r"{\0}Hel{\500}lo"
        );
    }

    #[test]
    fn test_strip_duplicates_text() {
        assert_eq!(
            render_text(r"{\k50}Hel{\k30}lo", "$text", true).unwrap(),
            "{Hel}Hel{lo}lo"
        );
    }

    #[test]
    fn test_all_variables() {
        let out = render_text(
            r"{\kf20}ab{\k10}c",
            "$i:$kind:$start-$end:$dur:$mid:$text|",
            true,
        )
        .unwrap();
        assert_eq!(out, "{0:kf:0-200:20:100:ab|}ab{1:k:200-300:10:250:c|}c");
    }

    #[test]
    fn test_expression_combines_variables() {
        let out = render_text(r"{\k50}a{\k30}b", r"k%$dur * 2%\t(%$start%,%$end - 50%)", false)
            .unwrap();
        assert_eq!(out, r"{\k100\t(0,450)}a{\k60\t(500,750)}b");
    }

    #[test]
    fn test_string_expression() {
        let out = render_text(r"{\k10}x", r#"%"[" + "$text" + "]"%"#, true).unwrap();
        assert_eq!(out, "{[x]}x");
    }

    #[test]
    fn test_percent_escapes() {
        assert_eq!(render_text(r"{\k10}x", "100%%", true).unwrap(), "{100%}x");
        assert_eq!(render_text(r"{\k10}x", "50% off", true).unwrap(), "{50% off}x");
    }

    #[test]
    fn test_internal_names_in_expressions() {
        let out = render_text(r"{\k50}a{\k30}b", "%_start + _dur * _i%", true).unwrap();
        assert_eq!(out, "{0}a{530}b");
    }

    #[test]
    fn test_variable_word_boundary() {
        assert_eq!(render_text(r"{\k10}x", "$item", true).unwrap(), "{$item}x");
    }

    #[test]
    fn test_no_karaoke_is_noop() {
        let mut line = AssLine::dialogue("Default", r"{\b1}plain{\b0}");
        let outcome = render(&mut line, &RenderOptions::new("%$start%", false)).unwrap();
        assert_eq!(outcome, RenderOutcome::NotKaraoke);
        assert_eq!(line.text, r"{\b1}plain{\b0}");
    }

    #[test]
    fn test_in_place_preserves_other_markup() {
        let out = render_text(r"{\1c&HFF&\k25\i1}red{\b1}!", "X", false).unwrap();
        assert_eq!(out, r"{\1c&HFF&\X\i1}red{\b1}!");
    }

    #[test]
    fn test_only_first_match_replaced_per_syllable() {
        // 同一音节中出现两个匹配时，只替换第一个
        let out = render_text(r"{\k10\k20}a", "R", false).unwrap();
        assert_eq!(out, r"{\R\k20}a");
    }

    #[test]
    fn test_replacement_is_literal() {
        assert_eq!(render_text(r"{\k10}a", "$$1", false).unwrap(), r"{\$$1}a");
    }

    #[test]
    fn test_strip_never_emits_timing_tags() {
        let out = render_text(r"{\k10}ka{\kf20\b1}ra{\ko5}oke", "$dur", true).unwrap();
        assert_eq!(out, "{10}ka{20}ra{5}oke");
    }

    #[test]
    fn test_custom_tag_pattern() {
        let mut line = AssLine::dialogue("Default", r"{\k50\1c&H00&}a");
        let options = RenderOptions::new("2c&HFF&", false)
            .with_tag_pattern(r"1c&H[0-9A-Fa-f]+&")
            .unwrap();
        render(&mut line, &options).unwrap();
        assert_eq!(line.text, r"{\k50\2c&HFF&}a");
    }

    #[test]
    fn test_invalid_tag_pattern() {
        assert!(matches!(
            RenderOptions::new("x", false).with_tag_pattern("("),
            Err(KaraokeError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_evaluation_error_leaves_line_untouched() {
        let text = r"{\k50}Hel{\k30}lo";
        let mut line = AssLine::dialogue("Default", text);
        let err = render(&mut line, &RenderOptions::new("%$text%", false)).unwrap_err();
        match err {
            KaraokeError::Evaluation {
                syllable_index,
                expression,
                reason,
            } => {
                assert_eq!(syllable_index, 0);
                assert_eq!(expression, "Hel");
                assert_eq!(reason, EvalErrorKind::UnknownIdentifier("Hel".to_string()));
            }
            other => panic!("预期 Evaluation 错误，实际为 {other:?}"),
        }
        assert_eq!(line.text, text);
    }

    #[test]
    fn test_error_reports_failing_syllable() {
        let err = render_text(r"{\k50}a{\k0}b", "%100 / $dur%", true).unwrap_err();
        assert!(matches!(
            err,
            KaraokeError::Evaluation {
                syllable_index: 1,
                reason: EvalErrorKind::DivisionByZero,
                ..
            }
        ));
    }

    #[test]
    fn test_cache_invalidated_after_render() {
        let mut line = AssLine::dialogue("Default", r"{\k50}a{\k30}b");
        render(&mut line, &RenderOptions::new("k%$dur + 1%", false)).unwrap();
        assert!(line.karaoke.is_none());
        assert_eq!(line.text, r"{\k51}a{\k31}b");

        let second = render(&mut line, &RenderOptions::new("%$start%", false)).unwrap();
        assert_eq!(second, RenderOutcome::Rendered { syllables: 2 });
        assert_eq!(line.text, r"{\0}a{\510}b");
    }

    #[test]
    fn test_leading_markup_is_kept() {
        assert_eq!(
            render_text(r"{\an8}{\k50}Hel{\k30}lo", "%$start%", false).unwrap(),
            r"{\an8}{\0}Hel{\500}lo"
        );
        assert_eq!(
            render_text(r"前奏 {\k50}Hel{\k30}lo", "%$start%", false).unwrap(),
            r"前奏 {\0}Hel{\500}lo"
        );
    }

    #[test]
    fn test_leading_plain_text_kept_in_strip_mode() {
        assert_eq!(
            render_text(r"{\an8}前奏 {\b1}~{\k50}Hel{\k30}lo", "$i", true).unwrap(),
            "前奏 ~{0}Hel{1}lo"
        );
    }

    #[test]
    fn test_malformed_tag_leaves_line_untouched() {
        let text = r"{\k50}Hel{\k3x}lo";
        let mut line = AssLine::dialogue("Default", text);
        let err = render(&mut line, &RenderOptions::new("%$start%", false)).unwrap_err();
        assert!(matches!(err, KaraokeError::MalformedTag { position: 10, .. }));
        assert_eq!(line.text, text);
        assert!(line.karaoke.is_none());
    }

    #[test]
    fn test_deeply_nested_template_is_an_error() {
        let template = format!("%{}1{}%", "(".repeat(50_000), ")".repeat(50_000));
        let text = r"{\k50}a";
        let mut line = AssLine::dialogue("Default", text);
        let err = render(&mut line, &RenderOptions::new(template, false)).unwrap_err();
        assert!(matches!(
            err,
            KaraokeError::Evaluation {
                reason: EvalErrorKind::Syntax { .. },
                ..
            }
        ));
        assert_eq!(line.text, text);
    }

    #[test]
    fn test_kt_mid_equals_start() {
        let out = render_text(r"{\k40}a{\kt100}b", "$mid", true).unwrap();
        assert_eq!(out, "{200}a{400}b");
    }
}
