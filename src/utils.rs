/// Parses a timeout string as used in sampler configs.
///
/// Accepted forms:
/// - bare integer: milliseconds ("1500")
/// - `ms` suffix: milliseconds ("250ms")
/// - `s`, `m`, `h` suffixes: seconds, minutes, hours ("30s", "5m", "2h")
///
/// An empty (or whitespace-only) string means "not configured" and yields
/// `Ok(None)`.
pub fn parse_timeout_string(s: &str) -> Result<Option<std::time::Duration>, String> {
    use std::time::Duration;

    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }

    let (value_str, to_duration): (&str, fn(u64) -> Duration) =
        if let Some(v) = s.strip_suffix("ms") {
            (v, Duration::from_millis)
        } else if let Some(v) = s.strip_suffix('s') {
            (v, Duration::from_secs)
        } else if let Some(v) = s.strip_suffix('m') {
            (v, |n| Duration::from_secs(n * 60))
        } else if let Some(v) = s.strip_suffix('h') {
            (v, |n| Duration::from_secs(n * 60 * 60))
        } else {
            (s, Duration::from_millis)
        };

    let value: u64 = value_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid numeric value in timeout: '{}'", value_str))?;

    Ok(Some(to_duration(value)))
}

/// Joins HTTP headers into the newline-separated `Name: value` form used
/// in sample results.
pub fn headers_to_string(headers: &reqwest::header::HeaderMap) -> String {
    let mut buf = String::with_capacity(headers.len() * 32);
    for (name, value) in headers {
        buf.push_str(name.as_str());
        buf.push_str(": ");
        buf.push_str(value.to_str().unwrap_or("<binary>"));
        buf.push('\n');
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_timeout_empty_means_unset() {
        assert_eq!(parse_timeout_string("").unwrap(), None);
        assert_eq!(parse_timeout_string("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_timeout_bare_integer_is_millis() {
        assert_eq!(
            parse_timeout_string("1500").unwrap(),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_parse_timeout_units() {
        assert_eq!(
            parse_timeout_string("250ms").unwrap(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            parse_timeout_string("30s").unwrap(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_timeout_string("5m").unwrap(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(
            parse_timeout_string("2h").unwrap(),
            Some(Duration::from_secs(7200))
        );
    }

    #[test]
    fn test_parse_timeout_rejects_garbage() {
        assert!(parse_timeout_string("abc").is_err());
        assert!(parse_timeout_string("12x").is_err());
    }

    #[test]
    fn test_headers_to_string() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("content-type", "text/plain".parse().unwrap());
        headers.insert("x-request-id", "abc123".parse().unwrap());

        let joined = headers_to_string(&headers);
        assert!(joined.contains("content-type: text/plain\n"));
        assert!(joined.contains("x-request-id: abc123\n"));
    }
}
