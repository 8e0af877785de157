//! Prompt templates bundled at compile time.
//!
//! Templates use `{{name}}` placeholders filled by [`render`]. Unknown
//! placeholders are left in place so a missing variable is visible in logs.

/// Topic complexity classification
pub const CLASSIFY: &str = include_str!("defaults/classify.md");

/// Research task decomposition
pub const PLAN: &str = include_str!("defaults/plan.md");

/// Source relevance filtering inside a worker
pub const EVALUATE: &str = include_str!("defaults/evaluate.md");

/// One worker's summary of its extracted sources
pub const WORKER_SYNTHESIS: &str = include_str!("defaults/worker_synthesis.md");

/// Session-wide synthesis over every Findings Record
pub const SYNTHESIS: &str = include_str!("defaults/synthesis.md");

/// Gap-filling tasks after thin coverage
pub const FOLLOW_UP: &str = include_str!("defaults/follow_up.md");

pub const OUTLINE: &str = include_str!("defaults/outline.md");

pub const DRAFT: &str = include_str!("defaults/draft.md");

pub const ANALYZE_FEEDBACK: &str = include_str!("defaults/analyze_feedback.md");

pub const REVISE: &str = include_str!("defaults/revise.md");

/// All templates with their slugs
pub fn all_defaults() -> Vec<(&'static str, &'static str)> {
    vec![
        ("classify", CLASSIFY),
        ("plan", PLAN),
        ("evaluate", EVALUATE),
        ("worker_synthesis", WORKER_SYNTHESIS),
        ("synthesis", SYNTHESIS),
        ("follow_up", FOLLOW_UP),
        ("outline", OUTLINE),
        ("draft", DRAFT),
        ("analyze_feedback", ANALYZE_FEEDBACK),
        ("revise", REVISE),
    ]
}

/// Fill `{{name}}` placeholders
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{{}}}}}", name), value);
    }
    out
}

/// `"None"` for empty optional fields, the way the templates expect
pub fn or_none(value: &str) -> &str {
    if value.trim().is_empty() {
        "None"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_templates_non_empty() {
        for (slug, template) in all_defaults() {
            assert!(!template.trim().is_empty(), "{} is empty", slug);
        }
    }

    #[test]
    fn test_render_fills_placeholders() {
        let out = render(CLASSIFY, &[
            ("topic", "WebAssembly"),
            ("content_type", "blog post"),
            ("word_count", "1500"),
            ("custom_instructions", "None"),
        ]);
        assert!(out.contains("Topic: WebAssembly"));
        assert!(out.contains("1500 words"));
        assert!(!out.contains("{{"));
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        assert_eq!(render("a {{x}} {{y}}", &[("x", "1")]), "a 1 {{y}}");
    }
}
