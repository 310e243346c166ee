use std::collections::BTreeMap;

use serde_json::Value;

/// Parses `key=value` pairs out of free-form message text.
///
/// Pairs are separated by runs of whitespace. A value wrapped in single or
/// double quotes may contain whitespace; the quotes are stripped. Tokens
/// without `=` or with an empty key are skipped, and a repeated key keeps its
/// last value. Values are stored as JSON strings.
pub fn parse_key_value_pairs(msg: &str) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    let mut rest = msg;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        let (token, remaining) = next_token(rest);
        rest = remaining;

        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }

        out.insert(key.to_string(), Value::String(unquote(value).to_string()));
    }

    out
}

/// Splits off the next whitespace-delimited token, keeping quoted spans whole.
fn next_token(s: &str) -> (&str, &str) {
    let mut quote: Option<char> = None;

    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() => return (&s[..i], &s[i..]),
            None => {}
        }
    }

    // Unterminated quote, e.g. a line cut short by the read: split as if unquoted.
    if quote.is_some() {
        if let Some(i) = s.find(char::is_whitespace) {
            return (&s[..i], &s[i..]);
        }
    }

    (s, "")
}

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
