//! Simple `*` wildcard matching used for pipeline ids, index names and template patterns.

/// The pattern that matches every name.
pub const MATCH_ALL: &str = "*";

/// Returns `true` if `pattern` contains at least one `*` wildcard.
pub fn is_simple_match_pattern(pattern: &str) -> bool {
    pattern.contains('*')
}

/// Returns `true` if `pattern` is the match-all pattern.
pub fn is_match_all_pattern(pattern: &str) -> bool {
    pattern == MATCH_ALL
}

/// Match `value` against `pattern`, where each `*` in the pattern matches zero or more
/// characters. Patterns without a wildcard must match exactly.
pub fn simple_match(pattern: &str, value: &str) -> bool {
    if !is_simple_match_pattern(pattern) {
        return pattern == value;
    }

    let pattern = pattern.as_bytes();
    let value = value.as_bytes();
    let (mut p, mut v) = (0, 0);
    // position of the last `*` seen in the pattern, and the value position it was matched at
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, v));
            p += 1;
        } else if p < pattern.len() && pattern[p] == value[v] {
            p += 1;
            v += 1;
        } else if let Some((star, matched)) = backtrack {
            // let the last `*` swallow one more character
            p = star + 1;
            v = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|b| *b == b'*')
}
