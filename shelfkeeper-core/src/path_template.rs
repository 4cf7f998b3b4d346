//! Template rendering for organized library paths (spec §4.1).
//!
//! Grounded on `kobold.utils.paths.PathTemplate` / `sanitize_filename`.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches a `{variable}` placeholder.
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\w+)\}").unwrap());

/// Characters forbidden in path segments on common filesystems, plus control
/// characters.
static FORBIDDEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap());

const MAX_SEGMENT_LENGTH: usize = 200;

/// Replace characters a filesystem can't store with `_`, strip leading and
/// trailing dots/whitespace, and truncate to [`MAX_SEGMENT_LENGTH`]
/// preserving any extension suffix. May return an empty string; callers that
/// join several sanitized pieces into a path are responsible for dropping
/// empty segments.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = FORBIDDEN_RE.replace_all(name, "_");
    let trimmed = cleaned.trim_matches(|c: char| ". \t\n\r".contains(c));

    if trimmed.chars().count() > MAX_SEGMENT_LENGTH {
        truncate_preserving_suffix(trimmed, MAX_SEGMENT_LENGTH)
    } else {
        trimmed.to_string()
    }
}

/// Truncate to `max_len` characters, keeping the file extension (the
/// substring from the last `.` onward) intact when possible.
fn truncate_preserving_suffix(s: &str, max_len: usize) -> String {
    let suffix_start = match s.rfind('.') {
        Some(idx) if idx > 0 => Some(idx),
        _ => None,
    };

    match suffix_start {
        Some(idx) => {
            let suffix: String = s[idx..].chars().collect();
            let suffix_len = suffix.chars().count();
            if suffix_len < max_len {
                let keep = max_len - suffix_len;
                let stem: String = s[..idx].chars().take(keep).collect();
                format!("{stem}{suffix}")
            } else {
                s.chars().take(max_len).collect()
            }
        }
        None => s.chars().take(max_len).collect(),
    }
}

/// A path template over `{var}` placeholders resolved from a flat variable
/// map. Unknown placeholders render as an empty string; missing/empty
/// resolved segments are dropped entirely rather than leaving an empty path
/// component.
pub struct PathTemplate {
    template: String,
}

impl PathTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Render the template against `variables`. Each placeholder's *value*
    /// is sanitized individually before substitution (so a value can never
    /// introduce a spurious path separator); the template's literal text is
    /// left untouched. After substitution the result is split on `/`, each
    /// segment is stripped of surrounding whitespace, and empty segments are
    /// dropped. If nothing survives, `.` is returned as a sentinel for "no
    /// subdirectory".
    pub fn render(&self, variables: &HashMap<String, String>) -> String {
        let substituted = PLACEHOLDER_RE.replace_all(&self.template, |caps: &regex::Captures| {
            let key = &caps[1];
            match variables.get(key) {
                Some(value) => sanitize_filename(value),
                None => String::new(),
            }
        });

        let segments: Vec<&str> = substituted
            .split('/')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .collect();

        if segments.is_empty() {
            ".".to_string()
        } else {
            segments.join("/")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_simple_template() {
        let tpl = PathTemplate::new("{author}/{title}.epub");
        let rendered = tpl.render(&vars(&[("author", "Jane Austen"), ("title", "Emma")]));
        assert_eq!(rendered, "Jane Austen/Emma.epub");
    }

    #[test]
    fn missing_variable_renders_empty_and_segment_is_dropped() {
        let tpl = PathTemplate::new("{series}/{author}/{title}.epub");
        let rendered = tpl.render(&vars(&[("author", "Jane Austen"), ("title", "Emma")]));
        assert_eq!(rendered, "Jane Austen/Emma.epub");
    }

    #[test]
    fn sanitizes_forbidden_characters() {
        assert_eq!(sanitize_filename("Who: What?"), "Who_ What_");
        assert_eq!(sanitize_filename("a/b\\c"), "a_b_c");
    }

    #[test]
    fn empty_segment_becomes_sentinel_then_dropped() {
        let tpl = PathTemplate::new("{a}/{b}");
        let rendered = tpl.render(&vars(&[("b", "only")]));
        assert_eq!(rendered, "only");
    }

    #[test]
    fn truncates_long_segment_preserving_suffix() {
        let long_name = format!("{}{}", "x".repeat(250), ".epub");
        let result = sanitize_filename(&long_name);
        assert!(result.chars().count() <= MAX_SEGMENT_LENGTH);
        assert!(result.ends_with(".epub"));
    }

    #[test]
    fn dots_and_whitespace_strip_to_empty_string() {
        assert_eq!(sanitize_filename("..."), "");
        assert_eq!(sanitize_filename("   "), "");
    }

    #[test]
    fn all_fields_missing_yields_dot_sentinel() {
        let tpl = PathTemplate::new("{author}/{title}");
        let rendered = tpl.render(&vars(&[]));
        assert_eq!(rendered, ".");
    }

    #[test]
    fn only_the_placeholder_value_is_sanitized_not_surrounding_literal_text() {
        let tpl = PathTemplate::new("{author} Collection");
        let rendered = tpl.render(&vars(&[("author", "Who: What?")]));
        assert_eq!(rendered, "Who_ What_ Collection");
    }

    #[test]
    fn whitespace_padded_values_are_stripped() {
        let tpl = PathTemplate::new("{author}/{title}");
        let rendered = tpl.render(&vars(&[("author", " Author "), ("title", " Title. ")]));
        assert_eq!(rendered, "Author/Title");
    }
}
