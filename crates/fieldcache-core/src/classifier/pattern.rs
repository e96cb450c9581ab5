//! Glob-style path patterns
//!
//! `*` matches within a single path segment, `**` matches any number of
//! segments (including none).

use tracing::warn;

/// Maximum iterations allowed for one match to bound backtracking
const MAX_MATCH_ITERATIONS: usize = 10000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternPart {
    Literal(String),
    SingleWildcard,
    MultiWildcard,
}

/// A compiled path pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    parts: Vec<PatternPart>,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Self {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = pattern.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch != '*' {
                literal.push(ch);
                continue;
            }

            if !literal.is_empty() {
                parts.push(PatternPart::Literal(std::mem::take(&mut literal)));
            }

            if chars.peek() == Some(&'*') {
                chars.next();
                // The wildcard owns its leading slash so `/a/**` matches `/a`
                if let Some(PatternPart::Literal(prev)) = parts.last_mut() {
                    if prev.ends_with('/') {
                        prev.pop();
                        if prev.is_empty() {
                            parts.pop();
                        }
                    }
                }
                parts.push(PatternPart::MultiWildcard);
            } else {
                parts.push(PatternPart::SingleWildcard);
            }
        }

        if !literal.is_empty() {
            parts.push(PatternPart::Literal(literal));
        }

        Self {
            source: pattern.to_string(),
            parts,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut iterations = 0;
        match_from(&self.parts, path, &mut iterations)
    }
}

fn match_from(parts: &[PatternPart], path: &str, iterations: &mut usize) -> bool {
    *iterations += 1;
    if *iterations > MAX_MATCH_ITERATIONS {
        warn!(
            "Pattern matching exceeded {} iterations, aborting",
            MAX_MATCH_ITERATIONS
        );
        return false;
    }

    let Some((part, rest)) = parts.split_first() else {
        return path.is_empty();
    };

    match part {
        PatternPart::Literal(lit) => match path.strip_prefix(lit.as_str()) {
            Some(remaining) => match_from(rest, remaining, iterations),
            None => false,
        },
        PatternPart::SingleWildcard => {
            let end = path.find('/').unwrap_or(path.len());
            // A segment wildcard needs at least one character
            (1..=end).rev().any(|i| match_from(rest, &path[i..], iterations))
        }
        PatternPart::MultiWildcard => {
            // Consumes nothing or whole segments starting with '/'
            if !path.is_empty() && !path.starts_with('/') {
                return false;
            }
            if rest.is_empty() {
                return true;
            }
            path.char_indices()
                .map(|(i, _)| i)
                .chain(std::iter::once(path.len()))
                .any(|i| match_from(rest, &path[i..], iterations))
        }
    }
}
