//! SQL utility functions

/// Escape SQL LIKE metacharacters (%, _, \) in user input
///
/// Patterns built from these strings must be rendered with `ESCAPE '\'`.
///
/// # Example
///
/// ```
/// use querygate_engine::utils::sql::escape_like_pattern;
///
/// let pattern = format!("%{}%", escape_like_pattern("100% match_test"));
/// assert_eq!(pattern, "%100\\% match\\_test%");
/// ```
pub fn escape_like_pattern(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Where the literal must appear inside the matched string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeAnchor {
    Anywhere,
    Start,
    End,
}

/// LIKE pattern matching `s` literally at the given anchor
pub fn like_pattern(s: &str, anchor: LikeAnchor) -> String {
    let escaped = escape_like_pattern(s);
    match anchor {
        LikeAnchor::Anywhere => format!("%{}%", escaped),
        LikeAnchor::Start => format!("{}%", escaped),
        LikeAnchor::End => format!("%{}", escaped),
    }
}
