use regex::Regex;

/// Anchored wildcard match: `*` is the only special character and expands to
/// zero or more of anything; everything else is literal. The whole subject
/// must conform, there are no partial matches.
pub fn match_with_wildcard(pattern: &str, subject: &str) -> bool {
    let escaped = regex::escape(pattern).replace("\\*", ".*");
    let expression = Regex::new(&format!("^{escaped}$"))
        .expect("an escaped wildcard pattern is always a valid expression");

    expression.is_match(subject)
}

/// True when `subject` matches any pattern of an ignore list.
pub fn is_ignored(patterns: &[String], subject: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| match_with_wildcard(pattern, subject))
}
