//! 步骤 / 子任务文本解析
//!
//! 主模式：`步骤N: 描述`（或 `Step N: 描述`，子任务为 `子任务N:` / `Subtask N:`，冒号全角半角均可）；
//! 主模式一条都没匹配时，退回扫描编号行（`1.` `1、` `1)`）与列表行（`-` `*` `•`），去掉标记后取正文。
//! 去掉标记后为空的行一律丢弃。

use std::sync::OnceLock;

use regex::Regex;

/// 解析对象：顶层步骤或子任务
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepLabel {
    Step,
    Subtask,
}

fn step_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t>#*]*(?:步骤|step)[ \t]*(\d+)[ \t]*\**[ \t]*[:：][ \t]*(.*)$")
            .expect("valid step regex")
    })
}

fn subtask_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t>#*]*(?:子任务|sub-?task)[ \t]*(\d+)[ \t]*\**[ \t]*[:：][ \t]*(.*)$")
            .expect("valid subtask regex")
    })
}

fn fallback_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:\d+\s*[.、)）]|[-*•])\s*(.*)$").expect("valid list regex")
    })
}

/// 去掉 Markdown 加粗等残留符号
fn clean(desc: &str) -> String {
    desc.trim().trim_matches('*').trim().to_string()
}

/// 将 LLM 输出解析为有序描述列表（可能为空）
pub fn parse_steps(text: &str, label: StepLabel) -> Vec<String> {
    let primary = match label {
        StepLabel::Step => step_pattern(),
        StepLabel::Subtask => subtask_pattern(),
    };

    let matched: Vec<String> = primary
        .captures_iter(text)
        .filter_map(|c| c.get(2).map(|m| clean(m.as_str())))
        .filter(|d| !d.is_empty())
        .collect();
    if !matched.is_empty() {
        return matched;
    }

    text.lines()
        .filter_map(|line| fallback_pattern().captures(line))
        .filter_map(|c| c.get(1).map(|m| clean(m.as_str())))
        .filter(|d| !d.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_chinese_steps() {
        let steps = parse_steps("步骤1: 写一段话\n步骤2: 审阅这段话", StepLabel::Step);
        assert_eq!(steps, vec!["写一段话", "审阅这段话"]);
    }

    #[test]
    fn test_primary_full_width_colon_and_english() {
        let text = "好的，计划如下：\n步骤 1：收集资料\nStep 2: Draft the outline\n**步骤3**: 定稿";
        let steps = parse_steps(text, StepLabel::Step);
        assert_eq!(steps, vec!["收集资料", "Draft the outline", "定稿"]);
    }

    #[test]
    fn test_primary_skips_empty_descriptions() {
        let steps = parse_steps("步骤1:\n步骤2: 有内容\n步骤3:   ", StepLabel::Step);
        assert_eq!(steps, vec!["有内容"]);
    }

    #[test]
    fn test_fallback_numbered_and_bulleted() {
        let text = "计划：\n1. 打开文件\n2、读取内容\n3) 输出摘要\n- 检查格式\n• 提交\n普通说明行";
        let steps = parse_steps(text, StepLabel::Step);
        assert_eq!(
            steps,
            vec!["打开文件", "读取内容", "输出摘要", "检查格式", "提交"]
        );
    }

    #[test]
    fn test_fallback_drops_bare_markers() {
        let steps = parse_steps("1.\n-\n2. 真实步骤", StepLabel::Step);
        assert_eq!(steps, vec!["真实步骤"]);
    }

    #[test]
    fn test_subtask_label() {
        let text = "子任务1: 列提纲\n子任务2：写正文\n步骤3: 不应被子任务模式匹配";
        let subs = parse_steps(text, StepLabel::Subtask);
        assert_eq!(subs, vec!["列提纲", "写正文"]);
    }

    #[test]
    fn test_no_structure_yields_nothing() {
        assert!(parse_steps("这个目标无法拆分。", StepLabel::Step).is_empty());
        assert!(parse_steps("", StepLabel::Subtask).is_empty());
    }
}
