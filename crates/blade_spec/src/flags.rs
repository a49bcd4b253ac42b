//! Canonical string form of an action-flag map.
//!
//! A map is written as `--key=value` tokens separated by single spaces, in
//! key order. A part is wrapped in double quotes when it contains
//! whitespace, a quote or a backslash (and, for keys, an `=` or nothing at
//! all); inside quotes `\"` and `\\` are the only escapes.

use std::collections::BTreeMap;

use crate::{Result, SpecError};

pub type FlagMap = BTreeMap<String, String>;

pub fn serialize(flags: &FlagMap) -> String {
    flags
        .iter()
        .map(|(k, v)| format!("--{}={}", encode(k, true), encode(v, false)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn encode(part: &str, key: bool) -> String {
    let needs_quotes = (key && part.is_empty())
        || part
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || (key && c == '='));
    if !needs_quotes {
        return part.to_string();
    }
    let mut out = String::with_capacity(part.len() + 2);
    out.push('"');
    for c in part.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Parses a stored flag string back into its map.
///
/// Tokens that do not start with `--` are skipped. A flag without `=` is a
/// switch and decodes to `"true"`.
pub fn parse(input: &str) -> Result<FlagMap> {
    let mut flags = FlagMap::new();
    for token in tokenize(input)? {
        if token.len() < 2 || token[0] != ('-', false) || token[1] != ('-', false) {
            continue;
        }
        let body = &token[2..];
        let split = body.iter().position(|&(c, quoted)| c == '=' && !quoted);
        let (key, value) = match split {
            Some(i) => (collect(&body[..i]), collect(&body[i + 1..])),
            None if body.is_empty() => continue,
            None => (collect(body), "true".to_string()),
        };
        flags.insert(key, value);
    }
    Ok(flags)
}

fn collect(chars: &[(char, bool)]) -> String {
    chars.iter().map(|&(c, _)| c).collect()
}

// Each char is tagged with whether it appeared inside quotes.
fn tokenize(input: &str) -> Result<Vec<Vec<(char, bool)>>> {
    let mut tokens = Vec::new();
    let mut current: Vec<(char, bool)> = Vec::new();
    let mut started = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c == '"' {
            started = true;
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(escaped) => current.push((escaped, true)),
                        None => return Err(SpecError::DanglingEscape(input.to_string())),
                    },
                    Some(inner) => current.push((inner, true)),
                    None => return Err(SpecError::UnterminatedQuote(input.to_string())),
                }
            }
        } else if c.is_whitespace() {
            if started {
                tokens.push(std::mem::take(&mut current));
                started = false;
            }
        } else {
            started = true;
            current.push((c, false));
        }
    }
    if started {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> FlagMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn plain_flags_are_unquoted() {
        let f = map(&[("cpu-percent", "10"), ("timeout", "30")]);
        assert_eq!(serialize(&f), "--cpu-percent=10 --timeout=30");
    }

    #[test]
    fn whitespace_values_are_quoted() {
        let f = map(&[("cmd", "sleep 10")]);
        assert_eq!(serialize(&f), "--cmd=\"sleep 10\"");
        assert_eq!(parse(&serialize(&f)).unwrap(), f);
    }

    #[test]
    fn round_trip_awkward_maps() {
        let cases = vec![
            map(&[]),
            map(&[("k", "")]),
            map(&[("", "v")]),
            map(&[("a=b", "c=d")]),
            map(&[("quote", "say \"hi\"")]),
            map(&[("path", "C:\\temp\\x")]),
            map(&[("multi", "line\none\ttab")]),
            map(&[("x", "--y=z"), ("y", " leading")]),
            map(&[("spaced key", "v"), ("uni", "héllo wörld")]),
        ];
        for f in cases {
            let s = serialize(&f);
            assert_eq!(parse(&s).unwrap(), f, "round trip of {s:?}");
        }
    }

    #[test]
    fn parse_skips_positional_tokens_and_reads_switches() {
        let f = parse("fullload --cpu-count=2   --debug").unwrap();
        assert_eq!(f, map(&[("cpu-count", "2"), ("debug", "true")]));
    }

    #[test]
    fn parse_rejects_unterminated_quote() {
        assert!(matches!(
            parse("--a=\"open"),
            Err(SpecError::UnterminatedQuote(_))
        ));
        assert!(matches!(
            parse("--a=\"x\\"),
            Err(SpecError::DanglingEscape(_))
        ));
    }
}
