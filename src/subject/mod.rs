//! Subject names and subject patterns.
//!
//! Subjects are `.`-separated tokens. Patterns may use two wildcard tokens:
//! - `*` matches exactly one token
//! - `>` matches one or more trailing tokens, and must be the last token
//!
//! Channels are always named by literal subjects; patterns only key limits
//! overrides.

mod sublist;

pub use sublist::Sublist;

/// Token separator.
pub const SEPARATOR: char = '.';

/// Single-token wildcard.
pub const PWC: &str = "*";

/// Trailing multi-token wildcard.
pub const FWC: &str = ">";

/// Returns true if `name` is a well-formed subject. Wildcard tokens are only
/// accepted when `wildcards_allowed` is set.
pub fn is_valid_channel_name(name: &str, wildcards_allowed: bool) -> bool {
    if name.is_empty() {
        return false;
    }
    let tokens: Vec<&str> = name.split(SEPARATOR).collect();
    let last = tokens.len() - 1;
    for (i, token) in tokens.iter().enumerate() {
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            return false;
        }
        if *token == PWC || *token == FWC {
            if !wildcards_allowed || (*token == FWC && i != last) {
                return false;
            }
        } else if token.contains(['*', '>']) {
            return false;
        }
    }
    true
}

/// Returns true if `name` contains no wildcard token.
pub fn is_literal(name: &str) -> bool {
    name.split(SEPARATOR).all(|t| t != PWC && t != FWC)
}

/// Rank of a single pattern token: `>` is the widest, literals the narrowest.
fn token_rank(token: &str) -> u8 {
    match token {
        FWC => 0,
        PWC => 1,
        _ => 2,
    }
}

/// Ordering key of a pattern, widest first.
///
/// Matches the order in which [`Sublist::matches`] returns values: tokens are
/// compared left to right, `>` before `*` before literals.
pub fn specificity_key(pattern: &str) -> Vec<(u8, &str)> {
    pattern
        .split(SEPARATOR)
        .map(|t| (token_rank(t), t))
        .collect()
}

/// Returns true if every subject matched by `narrow` is also matched by `wide`.
pub fn covers(wide: &str, narrow: &str) -> bool {
    let mut narrow_tokens = narrow.split(SEPARATOR);
    for w in wide.split(SEPARATOR) {
        let n = match narrow_tokens.next() {
            Some(n) => n,
            None => return false,
        };
        match w {
            FWC => return true,
            PWC if n != FWC => continue,
            _ if w == n => continue,
            _ => return false,
        }
    }
    narrow_tokens.next().is_none()
}
