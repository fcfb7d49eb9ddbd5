//! 子任务分解判定
//!
//! 判定顺序：
//! 1. 文本含「无需分解」标记 -> 不分解（最先检查，任何其他信号都不能推翻它）
//! 2. 文本含「需要分解」标记 -> 分解
//! 3. 其余交给调用方：开启 AI 判断时先问 LLM，失败或未开启时走 heuristic_needs_decomposition

use std::sync::OnceLock;

use regex::Regex;

/// 执行结果中表示「需要进一步分解」的显式标记
pub const NEEDS_DECOMPOSITION_MARKER: &str = "【需要分解】";
/// 执行结果中表示「无需分解」的显式标记
pub const NO_DECOMPOSITION_MARKER: &str = "【无需分解】";

/// 复杂度关键词：命中任意一个即分解
const COMPLEXITY_KEYWORDS: &[&str] = &[
    "比较复杂",
    "非常复杂",
    "较为复杂",
    "需要分阶段",
    "分阶段处理",
    "分多个步骤",
    "需要拆分",
    "需要进一步拆分",
    "需要分解",
    "too complex",
    "multiple stages",
    "break it down",
    "break this down",
];

/// 关键词前若出现否定词（「不需要分解」「not too complex」），该次命中不算
const NEGATIONS_ZH: &[char] = &['不', '无', '没', '别', '勿'];
const NEGATIONS_EN: &[&str] = &[" not ", "n't ", " no "];
/// 检查否定词的窗口：关键词之前的中文字符数 / 英文字符数
const NEGATION_WINDOW_ZH: usize = 3;
const NEGATION_WINDOW_EN: usize = 16;

/// 结构性模式至少命中的次数
const MIN_STRUCTURE_MATCHES: usize = 2;
/// 长文本阈值（字符数）
const LONG_TEXT_CHARS: usize = 300;
/// 长文本时分句标点的最少数量
const MIN_CLAUSE_SEPARATORS: usize = 6;

/// 显式标记的判定结果；None 表示没有标记，需要进一步判断
pub fn marker_decision(text: &str) -> Option<bool> {
    if text.contains(NO_DECOMPOSITION_MARKER) {
        Some(false)
    } else if text.contains(NEEDS_DECOMPOSITION_MARKER) {
        Some(true)
    } else {
        None
    }
}

fn structure_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)第[一二三四五六七八九十\d]+(?:步|阶段)|阶段\s*[一二三四五六七八九十\d]+|\b(?:stage|phase)\s*\d+|^\s*\d+\s*[.、)）]\s*\S",
        )
        .expect("valid structure regex")
    })
}

/// 启发式判定：关键词 / 结构性枚举 / 长文本且分句多
pub fn heuristic_needs_decomposition(text: &str) -> bool {
    let lower = text.to_lowercase();
    let keyword_hit = COMPLEXITY_KEYWORDS.iter().any(|k| {
        lower
            .match_indices(k)
            .any(|(pos, _)| !is_negated(&lower[..pos]))
    });
    if keyword_hit {
        return true;
    }

    if structure_pattern().find_iter(text).count() >= MIN_STRUCTURE_MATCHES {
        return true;
    }

    let separators = text
        .chars()
        .filter(|c| matches!(c, '，' | '；' | ',' | ';'))
        .count();
    text.chars().count() > LONG_TEXT_CHARS && separators >= MIN_CLAUSE_SEPARATORS
}

fn is_negated(prefix: &str) -> bool {
    let zh_tail = tail_chars(prefix, NEGATION_WINDOW_ZH);
    if zh_tail.chars().any(|c| NEGATIONS_ZH.contains(&c)) {
        return true;
    }
    let en_tail = format!(" {} ", tail_chars(prefix, NEGATION_WINDOW_EN).trim_end());
    NEGATIONS_EN.iter().any(|n| en_tail.contains(n))
}

fn tail_chars(text: &str, n: usize) -> String {
    let skip = text.chars().count().saturating_sub(n);
    text.chars().skip(skip).collect()
}

/// 解析 AI 判断的回答：以「是 / 需要 / yes / true」开头视为肯定
pub fn is_affirmative(answer: &str) -> bool {
    let a = answer
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_punctuation() || c == '【' || c == '「')
        .to_lowercase();
    if a.starts_with('否') || a.starts_with('不') || a.starts_with("no") {
        return false;
    }
    a.starts_with('是') || a.starts_with("需要") || a.starts_with("yes") || a.starts_with("true")
}
