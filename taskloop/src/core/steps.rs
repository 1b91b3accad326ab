//! Step list parsing for the `## Steps` section of a task body.
//!
//! Items look like `- text`, `* text` or `- Step 3: text`, optionally with a
//! `[ ]`/`[x]` checkbox. Checked items were completed by an earlier run and
//! are skipped when planning, so a task unblocked by a human resumes where
//! it stopped.

use std::sync::LazyLock;

use regex::Regex;

static STEPS_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^##\s+steps\b").expect("steps heading regex should compile"));

static SECTION_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,2}\s").expect("section end regex should compile"));

static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<indent>\s*)(?P<bullet>[-*])\s+(?:\[(?P<mark>[ xX])\]\s*)?(?P<rest>.*?)\s*$")
        .expect("step item regex should compile")
});

static STEP_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^step\s*\d+\s*:\s*").expect("step prefix regex should compile"));

/// One parsed step item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub text: String,
    pub done: bool,
}

/// Parse every item of the first `## Steps` section, in order.
pub fn parse_steps(body: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    for_each_item(body, |_, item| {
        if let Some(step) = item {
            steps.push(step);
        }
    });
    steps
}

/// Texts of the steps not yet checked off.
pub fn pending_steps(body: &str) -> Vec<String> {
    parse_steps(body)
        .into_iter()
        .filter(|s| !s.done)
        .map(|s| s.text)
        .collect()
}

/// Rewrite the Steps section so the first `count` unchecked items carry `[x]`.
///
/// Steps are worked in order, so completion is positional; two items with
/// the same text are checked off independently.
pub fn mark_steps_done(body: &str, count: usize) -> String {
    let mut left = count;
    let mut out = Vec::new();
    for_each_item(body, |line, item| match item {
        Some(step) if !step.done && left > 0 => {
            left -= 1;
            out.push(checked_line(line));
        }
        _ => out.push(line.to_string()),
    });
    let mut joined = out.join("\n");
    if body.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

fn checked_line(line: &str) -> String {
    let Some(caps) = ITEM_RE.captures(line) else {
        return line.to_string();
    };
    format!("{}{} [x] {}", &caps["indent"], &caps["bullet"], &caps["rest"])
}

/// Visit every line of `body`, passing the parsed step for item lines
/// inside the Steps section.
fn for_each_item(body: &str, mut visit: impl FnMut(&str, Option<Step>)) {
    let mut in_section = false;
    let mut section_seen = false;
    for line in body.lines() {
        if !section_seen && STEPS_HEADING_RE.is_match(line) {
            in_section = true;
            section_seen = true;
            visit(line, None);
            continue;
        }
        if in_section && SECTION_END_RE.is_match(line) {
            in_section = false;
        }
        if !in_section {
            visit(line, None);
            continue;
        }
        visit(line, parse_item(line));
    }
}

fn parse_item(line: &str) -> Option<Step> {
    let caps = ITEM_RE.captures(line)?;
    let done = caps
        .name("mark")
        .is_some_and(|m| m.as_str().eq_ignore_ascii_case("x"));
    let text = STEP_PREFIX_RE.replace(&caps["rest"], "").trim().to_string();
    if text.is_empty() {
        return None;
    }
    Some(Step { text, done })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "Intro line\n\n## Steps\n- Step 1: check disk space\n* report usage\n  - [x] already done\n- [ ] archive logs\n\n## Notes\n- not a step\n";

    #[test]
    fn parses_items_until_next_heading() {
        let steps = parse_steps(BODY);
        let texts: Vec<_> = steps.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["check disk space", "report usage", "already done", "archive logs"]
        );
        assert!(steps[2].done);
        assert!(!steps[3].done);
    }

    #[test]
    fn heading_is_case_insensitive() {
        let steps = parse_steps("## STEPS\n- one\n");
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn missing_section_yields_no_steps() {
        assert!(parse_steps("# Title\n\n- loose item\n").is_empty());
        assert!(parse_steps("## Steps\n\n## Next\n").is_empty());
    }

    #[test]
    fn pending_skips_checked_items() {
        assert_eq!(
            pending_steps(BODY),
            vec!["check disk space", "report usage", "archive logs"]
        );
    }

    #[test]
    fn mark_done_checks_leading_pending_items() {
        let updated = mark_steps_done(BODY, 1);
        assert!(updated.contains("- [x] Step 1: check disk space"));
        assert!(updated.contains("* report usage"));
        assert!(updated.contains("- not a step"));
        assert!(updated.ends_with('\n'));
        assert_eq!(pending_steps(&updated), vec!["report usage", "archive logs"]);
    }

    #[test]
    fn mark_done_skips_already_checked_and_replaces_open_checkbox() {
        let updated = mark_steps_done(BODY, 3);
        assert!(updated.contains("- [x] archive logs"));
        assert!(!updated.contains("[ ] archive logs"));
        assert!(updated.contains("  - [x] already done"));
        assert!(pending_steps(&updated).is_empty());
    }

    #[test]
    fn duplicate_steps_are_checked_off_one_at_a_time() {
        let body = "## Steps\n- send reminder\n- send reminder\n";
        let updated = mark_steps_done(body, 1);
        assert_eq!(updated, "## Steps\n- [x] send reminder\n- send reminder\n");
        assert_eq!(pending_steps(&updated), vec!["send reminder"]);
    }
}
