//! Minimal logfmt (`key=value key="quoted value" ...`) attribute parser.
//!
//! Byte-indexed rather than char-indexed: logfmt keys, `=`, `"` and
//! whitespace are all single-byte ASCII, so scanning on bytes never splits
//! a multi-byte UTF-8 value.

/// Parse a logfmt payload into an ordered list of `(key, value)` pairs.
/// Quoted values may contain spaces; an unterminated quote takes the rest
/// of the string. A bare token with no `=` is skipped.
pub fn parse(payload: &str) -> Vec<(String, String)> {
    let bytes = payload.as_bytes();
    let len = bytes.len();
    let mut pairs = Vec::new();
    let mut i = 0usize;

    while i < len {
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= len {
            break;
        }

        let key_start = i;
        while i < len && bytes[i] != b'=' && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let key_end = i;

        if i >= len || bytes[i] != b'=' {
            // Bare word with no '=' — not a key=value pair, skip it.
            continue;
        }
        i += 1; // consume '='

        let key = &payload[key_start..key_end];

        let value = if i < len && bytes[i] == b'"' {
            i += 1; // consume opening quote
            let value_start = i;
            while i < len && bytes[i] != b'"' {
                i += 1;
            }
            let value = &payload[value_start..i];
            if i < len {
                i += 1; // consume closing quote
            }
            value
        } else {
            let value_start = i;
            while i < len && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            &payload[value_start..i]
        };

        pairs.push((key.to_string(), value.to_string()));
    }

    pairs
}

/// Look up a single key's value.
pub fn get<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_pairs() {
        let pairs = parse("at=info status=200 bytes=512");
        assert_eq!(
            pairs,
            vec![
                ("at".to_string(), "info".to_string()),
                ("status".to_string(), "200".to_string()),
                ("bytes".to_string(), "512".to_string()),
            ]
        );
    }

    #[test]
    fn parses_quoted_values_with_spaces() {
        let pairs = parse(r#"path="/x" desc="Blank app" status=200"#);
        assert_eq!(get(&pairs, "path"), Some("/x"));
        assert_eq!(get(&pairs, "desc"), Some("Blank app"));
        assert_eq!(get(&pairs, "status"), Some("200"));
    }

    #[test]
    fn missing_key_returns_none() {
        let pairs = parse("at=info");
        assert_eq!(get(&pairs, "missing"), None);
    }

    #[test]
    fn skips_bare_words_without_equals() {
        let pairs = parse("noise at=info more-noise status=200");
        assert_eq!(get(&pairs, "at"), Some("info"));
        assert_eq!(get(&pairs, "status"), Some("200"));
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn unterminated_quote_takes_rest_of_string() {
        let pairs = parse(r#"desc="unterminated"#);
        assert_eq!(get(&pairs, "desc"), Some("unterminated"));
    }
}
