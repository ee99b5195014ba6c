//! Static screen for catastrophic-backtracking regex shapes
//!
//! Conservative: flags a group that can itself repeat without bound (or
//! offers overlapping alternatives) when the group is quantified again.
//! It does not prove a pattern safe; patterns are run by the store's regex
//! engine, which may backtrack.

/// Bounded repetition counts at or above this are treated like `*`
const HEAVY_REPEAT: u32 = 10;

#[derive(Default)]
struct Frame {
    has_unbounded: bool,
    alternatives: Vec<String>,
    current: String,
}

impl Frame {
    fn has_overlapping_alternatives(&self) -> bool {
        let mut alts: Vec<&str> = self.alternatives.iter().map(String::as_str).collect();
        alts.push(&self.current);
        if alts.len() < 2 {
            return false;
        }
        for (i, a) in alts.iter().enumerate() {
            for b in alts.iter().skip(i + 1) {
                if a.is_empty() || b.is_empty() || a.starts_with(b) || b.starts_with(a) {
                    return true;
                }
            }
        }
        false
    }
}

#[derive(Clone, Copy)]
enum Atom {
    None,
    Simple,
    Group { repeats: bool, overlapping: bool },
}

/// Quantifier kinds recognised after an atom
enum Quantifier {
    Optional,
    Unbounded,
    Bounded(u32),
}

/// Returns true when `pattern` has a known catastrophic shape
/// such as `(.*)+`, `(a+)*` or `(a|a)*`.
pub fn is_catastrophic(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    let mut stack: Vec<Frame> = vec![Frame::default()];
    let mut last = Atom::None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                let end = (i + 2).min(chars.len());
                push_text(&mut stack, &chars[i..end]);
                last = Atom::Simple;
                i = end;
                continue;
            }
            '[' => {
                let end = skip_class(&chars, i);
                push_text(&mut stack, &chars[i..end]);
                last = Atom::Simple;
                i = end;
                continue;
            }
            '(' => {
                match group_prefix_len(&chars, i + 1) {
                    GroupPrefix::FlagsOnly(len) => {
                        i += 1 + len;
                        continue;
                    }
                    GroupPrefix::Capture(len) => {
                        stack.push(Frame::default());
                        last = Atom::None;
                        i += 1 + len;
                        continue;
                    }
                }
            }
            ')' => {
                if stack.len() > 1 {
                    let frame = stack.pop().unwrap_or_default();
                    let overlapping = frame.has_overlapping_alternatives();
                    if let Some(parent) = stack.last_mut() {
                        parent.has_unbounded |= frame.has_unbounded;
                        parent.current.push('(');
                        parent.current.push_str(&frame.alternatives.join("|"));
                        if !frame.alternatives.is_empty() {
                            parent.current.push('|');
                        }
                        parent.current.push_str(&frame.current);
                        parent.current.push(')');
                    }
                    last = Atom::Group {
                        repeats: frame.has_unbounded,
                        overlapping,
                    };
                }
                i += 1;
                continue;
            }
            '|' => {
                if let Some(frame) = stack.last_mut() {
                    let alt = std::mem::take(&mut frame.current);
                    frame.alternatives.push(alt);
                }
                last = Atom::None;
                i += 1;
                continue;
            }
            _ => {}
        }

        if let Some((quantifier, len)) = parse_quantifier(&chars, i) {
            let risky = match quantifier {
                Quantifier::Unbounded => true,
                Quantifier::Bounded(max) => max >= HEAVY_REPEAT,
                Quantifier::Optional => false,
            };
            if risky
                && let Atom::Group {
                    repeats,
                    overlapping,
                } = last
                && (repeats || overlapping)
            {
                return true;
            }
            if matches!(quantifier, Quantifier::Unbounded)
                && !matches!(last, Atom::None)
                && let Some(frame) = stack.last_mut()
            {
                frame.has_unbounded = true;
            }
            push_text(&mut stack, &chars[i..i + len]);
            last = Atom::None;
            i += len;
            continue;
        }

        push_text(&mut stack, &chars[i..i + 1]);
        last = Atom::Simple;
        i += 1;
    }

    false
}

fn push_text(stack: &mut [Frame], text: &[char]) {
    if let Some(frame) = stack.last_mut() {
        frame.current.extend(text.iter());
    }
}

/// Index just past the character class starting at `start`
fn skip_class(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    if chars.get(i) == Some(&'^') {
        i += 1;
    }
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ']' => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

enum GroupPrefix {
    /// `(?i)`: inline flags, not a group
    FlagsOnly(usize),
    /// Length of `?:`, `?P<name>`, `?<name>` or `?i:` after the paren
    Capture(usize),
}

fn group_prefix_len(chars: &[char], start: usize) -> GroupPrefix {
    if chars.get(start) != Some(&'?') {
        return GroupPrefix::Capture(0);
    }
    let mut i = start + 1;
    match chars.get(i) {
        Some('P') if chars.get(i + 1) == Some(&'<') => {
            i += 2;
            while i < chars.len() && chars[i] != '>' {
                i += 1;
            }
            GroupPrefix::Capture((i + 1).min(chars.len()) - start)
        }
        Some('<') => {
            while i < chars.len() && chars[i] != '>' {
                i += 1;
            }
            GroupPrefix::Capture((i + 1).min(chars.len()) - start)
        }
        _ => {
            while i < chars.len() && (chars[i].is_ascii_alphabetic() || chars[i] == '-') {
                i += 1;
            }
            match chars.get(i) {
                Some(')') => GroupPrefix::FlagsOnly(i + 1 - start),
                Some(':') => GroupPrefix::Capture(i + 1 - start),
                _ => GroupPrefix::Capture(i - start),
            }
        }
    }
}

/// Parses `*`, `+`, `?`, `{n}`, `{n,}`, `{n,m}` plus a lazy/possessive suffix
fn parse_quantifier(chars: &[char], start: usize) -> Option<(Quantifier, usize)> {
    let (quantifier, mut len) = match chars.get(start)? {
        '*' | '+' => (Quantifier::Unbounded, 1),
        '?' => (Quantifier::Optional, 1),
        '{' => {
            let close = chars[start..].iter().position(|&c| c == '}')?;
            let body: String = chars[start + 1..start + close].iter().collect();
            let (min, max) = match body.split_once(',') {
                Some((min, max)) => (min.trim(), Some(max.trim())),
                None => (body.trim(), None),
            };
            let min: u32 = min.parse().ok()?;
            let quantifier = match max {
                Some("") => Quantifier::Unbounded,
                Some(max) => Quantifier::Bounded(max.parse().ok()?),
                None => Quantifier::Bounded(min),
            };
            (quantifier, close + 1)
        }
        _ => return None,
    };
    if matches!(chars.get(start + len), Some('?') | Some('+')) {
        len += 1;
    }
    Some((quantifier, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_unbounded_quantifiers() {
        for pattern in ["(.*)+", "(.+)+", "(.*)*", "(a+)+", "(a*)*", "^(\\d+)*$", "((ab)*)+"] {
            assert!(is_catastrophic(pattern), "expected unsafe: {}", pattern);
        }
    }

    #[test]
    fn test_overlapping_alternation() {
        assert!(is_catastrophic("(a|a)*"));
        assert!(is_catastrophic("(a|ab)+"));
        assert!(!is_catastrophic("(a|b)*"));
    }

    #[test]
    fn test_named_and_non_capturing_groups() {
        assert!(is_catastrophic("(?:x+)+"));
        assert!(is_catastrophic("(?P<word>\\w+)*"));
        assert!(!is_catastrophic("(?i)abc+"));
    }

    #[test]
    fn test_heavy_bounded_repetition() {
        assert!(is_catastrophic("(.*){12}"));
        assert!(is_catastrophic("(a+){2,20}"));
        assert!(!is_catastrophic("(a+){2}"));
    }

    #[test]
    fn test_safe_patterns() {
        for pattern in [
            "^[a-z]+@[a-z]+\\.com$",
            "(ab)+",
            "\\d{3}-\\d{4}",
            "^iphone",
            "[(+*)]+",
            "\\(a+\\)+",
            "colou?r",
            "(\\d{3})-\\d+",
        ] {
            assert!(!is_catastrophic(pattern), "expected safe: {}", pattern);
        }
    }
}
