use std::sync::LazyLock;

use regex::Regex;

use crate::quiz::provider::ResponseFormat;

pub const SUMMARY_LABEL: &str = "分析结果";
pub const ADVICE_LABEL: &str = "医学建议";

pub const SUMMARY_MAX_CHARS: usize = 80;
pub const ADVICE_MAX_CHARS: usize = 150;
/// Summary length used when the reply has no recognisable sections.
pub const FALLBACK_SUMMARY_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAnalysis {
    pub summary: String,
    pub advice: String,
}

/// Splits a model reply into summary and advice. Never fails: a reply without
/// the expected sections is shown as-is, cut to size.
pub fn parse(raw: &str, format: ResponseFormat) -> ParsedAnalysis {
    let (summary, advice) = match format {
        ResponseFormat::BracketTagged => bracket_sections(raw),
        ResponseFormat::MarkdownHeading => markdown_sections(raw),
    };

    let summary = truncate(summary.trim(), SUMMARY_MAX_CHARS);
    let advice = truncate(advice.trim(), ADVICE_MAX_CHARS);

    if summary.is_empty() && advice.is_empty() {
        return ParsedAnalysis {
            summary: truncate(raw, FALLBACK_SUMMARY_CHARS),
            advice: truncate(raw, ADVICE_MAX_CHARS),
        };
    }

    ParsedAnalysis { summary, advice }
}

static BRACKET_SUMMARY: LazyLock<Regex> = LazyLock::new(|| bracket_label(SUMMARY_LABEL));
static BRACKET_ADVICE: LazyLock<Regex> = LazyLock::new(|| bracket_label(ADVICE_LABEL));
static MARKDOWN_SUMMARY: LazyLock<Regex> = LazyLock::new(|| markdown_heading(SUMMARY_LABEL));
static MARKDOWN_ADVICE: LazyLock<Regex> = LazyLock::new(|| markdown_heading(ADVICE_LABEL));
static NEXT_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^###(?:[^#]|$)").expect("heading pattern is valid"));

/// `【分析结果】（80字以内）：...` style. The qualifier and the colon are optional.
fn bracket_label(name: &str) -> Regex {
    Regex::new(&format!(r"【{}】(?:[（(][^）)\n]*[）)])?[ \t]*[：:]?", name))
        .expect("bracket label pattern is valid")
}

/// `### 分析结果` style.
fn markdown_heading(name: &str) -> Regex {
    Regex::new(&format!(r"(?m)^###[ \t]*{}[^\n]*$", name))
        .expect("markdown heading pattern is valid")
}

fn bracket_sections(raw: &str) -> (&str, &str) {
    let summary = section(raw, &BRACKET_SUMMARY, &BRACKET_ADVICE);
    let advice = section_to_end(raw, &BRACKET_ADVICE);
    (summary, advice)
}

/// A markdown section runs until the next level-3 heading.
fn markdown_sections(raw: &str) -> (&str, &str) {
    let summary = section(raw, &MARKDOWN_SUMMARY, &NEXT_HEADING);
    let advice = section_to_end(raw, &MARKDOWN_ADVICE);
    (summary, advice)
}

/// Text after `start` up to the first `end` match that follows it.
fn section<'a>(raw: &'a str, start: &Regex, end: &Regex) -> &'a str {
    start
        .find(raw)
        .map(|m| {
            let rest = &raw[m.end()..];
            match end.find(rest) {
                Some(next) => &rest[..next.start()],
                None => rest,
            }
        })
        .unwrap_or("")
}

fn section_to_end<'a>(raw: &'a str, start: &Regex) -> &'a str {
    start.find(raw).map(|m| &raw[m.end()..]).unwrap_or("")
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracket_reply() {
        let parsed = parse(
            "【分析结果】：肾功能基本正常\n【医学建议】：多喝水，少熬夜",
            ResponseFormat::BracketTagged,
        );
        assert_eq!(parsed.summary, "肾功能基本正常");
        assert_eq!(parsed.advice, "多喝水，少熬夜");
    }

    #[test]
    fn bracket_reply_with_qualifier_and_blank_lines() {
        let raw = "好的，下面是分析。\n【分析结果】（80字以内）：你的肝脏状况还不错。\n\n\n【医学建议】(150字以内): 少喝酒，别熬夜。\n";
        let parsed = parse(raw, ResponseFormat::BracketTagged);
        assert_eq!(parsed.summary, "你的肝脏状况还不错。");
        assert_eq!(parsed.advice, "少喝酒，别熬夜。");
    }

    #[test]
    fn bracket_reply_without_advice() {
        let parsed = parse("【分析结果】：一切正常", ResponseFormat::BracketTagged);
        assert_eq!(parsed.summary, "一切正常");
        assert_eq!(parsed.advice, "");
    }

    #[test]
    fn markdown_reply() {
        let parsed = parse(
            "### 分析结果\n一切正常\n### 医学建议\n注意休息",
            ResponseFormat::MarkdownHeading,
        );
        assert_eq!(parsed.summary, "一切正常");
        assert_eq!(parsed.advice, "注意休息");
    }

    #[test]
    fn markdown_summary_keeps_deeper_headings() {
        let raw = "### 分析结果\n总体不错\n#### 细节\n胃酸偏多\n### 其他\n无\n### 医学建议\n按时吃饭";
        let parsed = parse(raw, ResponseFormat::MarkdownHeading);
        assert_eq!(parsed.summary, "总体不错\n#### 细节\n胃酸偏多");
        assert_eq!(parsed.advice, "按时吃饭");
    }

    #[test]
    fn format_is_not_guessed_from_text() {
        // Markdown text parsed as bracket-tagged has no sections and falls back.
        let raw = "### 分析结果\n一切正常";
        let parsed = parse(raw, ResponseFormat::BracketTagged);
        assert_eq!(parsed.summary, raw);
        assert_eq!(parsed.advice, raw);
    }

    #[test]
    fn unlabelled_text_falls_back_to_raw() {
        let raw = "这是一段没有任何标签的回答。".repeat(20);
        let parsed = parse(&raw, ResponseFormat::MarkdownHeading);
        let chars: Vec<char> = raw.chars().collect();
        assert_eq!(parsed.summary, chars[..50].iter().collect::<String>());
        assert_eq!(parsed.advice, chars[..150].iter().collect::<String>());
    }

    #[test]
    fn empty_sections_fall_back_to_raw() {
        let raw = "【分析结果】：\n【医学建议】：";
        let parsed = parse(raw, ResponseFormat::BracketTagged);
        assert_eq!(parsed.summary, raw);
        assert_eq!(parsed.advice, raw);
    }

    #[test]
    fn empty_input_gives_empty_strings() {
        for format in [ResponseFormat::BracketTagged, ResponseFormat::MarkdownHeading] {
            let parsed = parse("", format);
            assert!(parsed.summary.is_empty());
            assert!(parsed.advice.is_empty());
        }
    }

    #[test]
    fn repeated_calls_agree() {
        let raw = "【分析结果】：胃有点累\n【医学建议】：按时吃饭";
        let first = parse(raw, ResponseFormat::BracketTagged);
        for _ in 0..3 {
            assert_eq!(parse(raw, ResponseFormat::BracketTagged), first);
        }
        assert_eq!(first.summary, "胃有点累");
    }

    #[test]
    fn sections_are_capped() {
        let long = "很".repeat(500);
        let inputs = [
            format!("【分析结果】：{long}\n【医学建议】：{long}"),
            format!("### 分析结果\n{long}\n### 医学建议\n{long}"),
            long.clone(),
            format!("【分析结果】{long}"),
        ];
        for raw in &inputs {
            for format in [ResponseFormat::BracketTagged, ResponseFormat::MarkdownHeading] {
                let parsed = parse(raw, format);
                assert!(parsed.summary.chars().count() <= SUMMARY_MAX_CHARS);
                assert!(parsed.advice.chars().count() <= ADVICE_MAX_CHARS);
            }
        }

        let parsed = parse(&inputs[0], ResponseFormat::BracketTagged);
        assert_eq!(parsed.summary.chars().count(), 80);
        assert_eq!(parsed.advice.chars().count(), 150);
    }
}
