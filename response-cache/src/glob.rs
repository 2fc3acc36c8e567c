//! Glob matching with Redis `KEYS` semantics.
//!
//! Supported syntax: `*` (any run), `?` (one byte), `[abc]`, `[^abc]`,
//! `[a-z]`, and `\` to escape the next byte.

/// Returns `true` if `key` matches `pattern`.
///
/// ```
/// # use response_cache::glob_match;
/// assert!(glob_match("cache:products*", "cache:products:page=2"));
/// assert!(!glob_match("cache:products*", "cache:orders:"));
/// ```
pub fn glob_match(pattern: &str, key: &str) -> bool {
    matches(pattern.as_bytes(), key.as_bytes())
}

/// Escape every glob metacharacter so `key` only matches itself.
pub fn glob_escape(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// Only `*` consumes a variable amount of text, so on a mismatch it is enough
// to resume from the most recent star with one more byte swallowed. Runs in
// O(pattern * text).
fn matches(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if pattern.get(p) == Some(&b'*') {
            p += 1;
            star = Some((p, t));
            continue;
        }
        if let Some(next) = step(pattern, p, text[t]) {
            p = next;
            t += 1;
            continue;
        }
        match star {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                star = Some((star_p, t));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

/// Match one pattern token at `p` against `byte`, returning the position of
/// the next token.
fn step(pattern: &[u8], p: usize, byte: u8) -> Option<usize> {
    match pattern.get(p..)? {
        [] | [b'*', ..] => None,
        [b'?', ..] => Some(p + 1),
        [b'[', class @ ..] => {
            let (hit, after) = match_class(class, byte);
            hit.then(|| pattern.len() - after.len())
        }
        [b'\\', escaped, ..] => (*escaped == byte).then_some(p + 2),
        [c, ..] => (*c == byte).then_some(p + 1),
    }
}

/// Match `byte` against a bracket class. `class` starts after the `[`; the
/// returned slice starts after the closing `]`. An unterminated class runs to
/// the end of the pattern, as in Redis.
fn match_class(mut class: &[u8], byte: u8) -> (bool, &[u8]) {
    let negate = class.first() == Some(&b'^');
    if negate {
        class = &class[1..];
    }
    let mut hit = false;
    loop {
        match class {
            [] => break,
            [b']', rest @ ..] => {
                class = rest;
                break;
            }
            [b'\\', escaped, rest @ ..] => {
                hit |= *escaped == byte;
                class = rest;
            }
            [lo, b'-', hi, rest @ ..] if *hi != b']' => {
                let (lo, hi) = if lo <= hi { (*lo, *hi) } else { (*hi, *lo) };
                hit |= (lo..=hi).contains(&byte);
                class = rest;
            }
            [c, rest @ ..] => {
                hit |= *c == byte;
                class = rest;
            }
        }
    }
    (hit != negate, class)
}
