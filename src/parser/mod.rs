//! Line parser & classifier: turns one framed record into zero or
//! one [`Point`], applying the classification rules in order and bumping
//! the matching non-fatal metric whenever a line is dropped rather than
//! emitted.

pub mod framing;
pub mod logfmt;

use crate::metrics::Metrics;
use crate::record::{Point, SeriesKind, Value};
use framing::FramedRecord;

const TOKEN_PREFIX: &str = "t.";

/// Classify one framed record, mutating `current_token` when the record's
/// `name` field carries a token override (`t.` prefix). The override
/// persists for the rest of the batch: a token carried only in the name
/// field overrides the header value for that line and every subsequent
/// line in the same batch.
pub fn parse_line(
    record: &FramedRecord,
    current_token: &mut String,
    metrics: &Metrics,
    debug: bool,
) -> Option<Point> {
    if record.name.starts_with(TOKEN_PREFIX) {
        *current_token = record.name.clone();
    }

    if current_token.is_empty() {
        metrics.inc_token_missing();
        return None;
    }
    let token = current_token.clone();

    if record.procid == "router" {
        classify_router(record, &token, metrics)
    } else {
        classify_dyno(record, &token, metrics, debug)
    }
}

fn classify_router(record: &FramedRecord, token: &str, metrics: &Metrics) -> Option<Point> {
    let payload = &record.payload;

    if payload.contains("code=H") {
        let ts = parse_timestamp_or_count(record, metrics)?;
        let pairs = logfmt::parse(payload);
        let code = logfmt::get(&pairs, "code").unwrap_or("").to_string();
        metrics.inc_lines_router_error(&code);
        return Some(Point::new(
            token,
            SeriesKind::RouterError,
            vec![Value::I64(ts), Value::Str(code)],
        ));
    }

    if payload.contains("code=blank-app") || payload.contains(r#"desc="Blank app""#) {
        metrics.inc_lines_router_blank();
        return None;
    }

    // router-request: strict. Any numeric field failure rejects the whole line.
    let ts = parse_timestamp_or_count(record, metrics)?;
    let pairs = logfmt::parse(payload);

    let status = strip_and_parse_i64(&pairs, "status", None);
    let service = strip_and_parse_i64(&pairs, "service", Some("ms"));
    let connect = strip_and_parse_i64(&pairs, "connect", Some("ms"));

    let (Some(status), Some(service), Some(_connect)) = (status, service, connect) else {
        metrics.inc_logfmt_parse_error();
        return None;
    };

    metrics.inc_lines_router();
    Some(Point::new(
        token,
        SeriesKind::RouterRequest,
        vec![Value::I64(ts), Value::I64(status), Value::I64(service)],
    ))
}

fn classify_dyno(
    record: &FramedRecord,
    token: &str,
    metrics: &Metrics,
    debug: bool,
) -> Option<Point> {
    let payload = &record.payload;

    if let Some(rest) = payload.strip_prefix("Error R") {
        let code_str: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        let code: i64 = code_str.parse().unwrap_or(0);
        let ts = parse_timestamp_or_count(record, metrics)?;
        metrics.inc_lines_dyno_error();
        return Some(Point::new(
            token,
            SeriesKind::DynoEvent,
            vec![
                Value::I64(ts),
                Value::Str(record.procid.clone()),
                Value::Str("R".to_string()),
                Value::I64(code),
                Value::Str(payload.clone()),
                Value::Str(dyno_type(&record.procid).to_string()),
            ],
        ));
    }

    if payload.contains("sample#memory_total") {
        let pairs = logfmt::parse(payload);
        let source = logfmt::get(&pairs, "source").unwrap_or("").to_string();
        if source.is_empty() {
            return None;
        }
        let ts = parse_timestamp_or_count(record, metrics)?;
        metrics.inc_lines_dyno_mem();

        let cache = strip_and_parse_f64_lenient(&pairs, "sample#memory_cache", Some("MB"));
        let pgpgin = strip_and_parse_i64_lenient(&pairs, "sample#memory_pgpgin", Some("pages"));
        let pgpgout = strip_and_parse_i64_lenient(&pairs, "sample#memory_pgpgout", Some("pages"));
        let rss = strip_and_parse_f64_lenient(&pairs, "sample#memory_rss", Some("MB"));
        let swap = strip_and_parse_f64_lenient(&pairs, "sample#memory_swap", Some("MB"));
        let total = strip_and_parse_f64_lenient(&pairs, "sample#memory_total", Some("MB"));

        return Some(Point::new(
            token,
            SeriesKind::DynoMem,
            vec![
                Value::I64(ts),
                Value::Str(source.clone()),
                Value::F64(cache),
                Value::I64(pgpgin),
                Value::I64(pgpgout),
                Value::F64(rss),
                Value::F64(swap),
                Value::F64(total),
                Value::Str(dyno_type(&source).to_string()),
            ],
        ));
    }

    if payload.contains("sample#load_avg_1m") {
        let pairs = logfmt::parse(payload);
        let source = logfmt::get(&pairs, "source").unwrap_or("").to_string();
        if source.is_empty() {
            return None;
        }
        let ts = parse_timestamp_or_count(record, metrics)?;
        metrics.inc_lines_dyno_load();

        let load_1m = strip_and_parse_f64_lenient(&pairs, "sample#load_avg_1m", None);
        let load_5m = strip_and_parse_f64_lenient(&pairs, "sample#load_avg_5m", None);
        let load_15m = strip_and_parse_f64_lenient(&pairs, "sample#load_avg_15m", None);

        return Some(Point::new(
            token,
            SeriesKind::DynoLoad,
            vec![
                Value::I64(ts),
                Value::Str(source.clone()),
                Value::F64(load_1m),
                Value::F64(load_5m),
                Value::F64(load_15m),
                Value::Str(dyno_type(&source).to_string()),
            ],
        ));
    }

    metrics.inc_unknown_heroku();
    if debug {
        tracing::debug!(procid = %record.procid, payload = %payload, "unrecognized dyno line");
    }
    None
}

/// Returns the substring of `s` before its first `.`, or `s` unchanged.
fn dyno_type(s: &str) -> &str {
    s.split('.').next().unwrap_or(s)
}

fn parse_timestamp_or_count(record: &FramedRecord, metrics: &Metrics) -> Option<i64> {
    match parse_timestamp(&record.timestamp) {
        Some(ts) => Some(ts),
        None => {
            metrics.inc_time_parse_error();
            None
        }
    }
}

/// Parses `YYYY-MM-DDTHH:MM:SS.ffffff+00:00` or `YYYY-MM-DDTHH:MM:SS+00:00`
/// into microseconds since epoch. Both shapes are valid RFC 3339, so a
/// single RFC 3339 parse covers both without a fallback attempt.
fn parse_timestamp(raw: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_micros())
}

fn strip_and_parse_i64(pairs: &[(String, String)], key: &str, suffix: Option<&str>) -> Option<i64> {
    let raw = logfmt::get(pairs, key)?;
    let stripped = suffix.and_then(|s| raw.strip_suffix(s)).unwrap_or(raw);
    stripped.parse::<i64>().ok()
}

/// Like [`strip_and_parse_i64`] but tolerant: a missing key or parse
/// failure yields `0` rather than rejecting the line. Used for dyno-error
/// fields, where a malformed number shouldn't discard an otherwise
/// actionable line.
fn strip_and_parse_i64_lenient(pairs: &[(String, String)], key: &str, suffix: Option<&str>) -> i64 {
    strip_and_parse_i64(pairs, key, suffix).unwrap_or(0)
}

fn strip_and_parse_f64_lenient(pairs: &[(String, String)], key: &str, suffix: Option<&str>) -> f64 {
    let Some(raw) = logfmt::get(pairs, key) else {
        return 0.0;
    };
    let stripped = suffix.and_then(|s| raw.strip_suffix(s)).unwrap_or(raw);
    stripped.parse::<f64>().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use framing::tokenize;

    fn frame_one(content: &str) -> FramedRecord {
        let framed = format!("{} {}", content.len(), content);
        let mut frames = tokenize(framed.as_bytes());
        frames.remove(0).unwrap()
    }

    #[test]
    fn router_request_emits_expected_tuple() {
        let record = frame_one(
            r#"<158>1 2024-01-02T03:04:05.123456+00:00 host t.abc router - at=info method=GET path="/x" host=a.example request_id=r1 fwd="1.2.3.4" dyno=web.1 connect=1ms service=42ms status=200 bytes=512"#,
        );
        let metrics = Metrics::new();
        let mut token = String::new();
        let point = parse_line(&record, &mut token, &metrics, false).expect("point emitted");
        assert_eq!(point.token, "t.abc");
        assert!(matches!(point.kind, SeriesKind::RouterRequest));
        assert_eq!(
            point.values,
            vec![Value::I64(1704164645123456), Value::I64(200), Value::I64(42)]
        );
    }

    #[test]
    fn router_error_emits_code_and_bumps_per_code_counter() {
        let record = frame_one(
            r#"<158>1 2024-01-02T03:04:05.123456+00:00 host t.abc router - at=error code=H12 desc="Request Timeout" method=GET path="/x""#,
        );
        let metrics = Metrics::new();
        let mut token = String::new();
        let point = parse_line(&record, &mut token, &metrics, false).expect("point emitted");
        assert!(matches!(point.kind, SeriesKind::RouterError));
        assert_eq!(point.values[1], Value::Str("H12".to_string()));
    }

    #[test]
    fn blank_app_emits_nothing() {
        let record = frame_one(
            r#"<158>1 2024-01-02T03:04:05.123456+00:00 host t.abc router - at=error code=blank-app"#,
        );
        let metrics = Metrics::new();
        let mut token = String::new();
        assert!(parse_line(&record, &mut token, &metrics, false).is_none());
    }

    #[test]
    fn dyno_memory_sample_emits_expected_tuple() {
        let record = frame_one(
            r#"<14>1 2024-01-02T03:04:05.123456+00:00 host app heroku.1.abc - source=web.1 dyno=heroku.1.uuid sample#memory_total=512.00MB sample#memory_rss=256.00MB sample#memory_cache=0.01MB sample#memory_swap=0.01MB sample#memory_pgpgin=10pages sample#memory_pgpgout=5pages"#,
        );
        let metrics = Metrics::new();
        let mut token = "t.header".to_string();
        let point = parse_line(&record, &mut token, &metrics, false).expect("point emitted");
        assert!(matches!(point.kind, SeriesKind::DynoMem));
        assert_eq!(
            point.values,
            vec![
                Value::I64(1704164645123456),
                Value::Str("web.1".to_string()),
                Value::F64(0.01),
                Value::I64(10),
                Value::I64(5),
                Value::F64(256.00),
                Value::F64(0.01),
                Value::F64(512.00),
                Value::Str("web".to_string()),
            ]
        );
    }

    #[test]
    fn dyno_error_emits_expected_tuple() {
        let record = frame_one(
            r#"<14>1 2024-01-02T03:04:05.123456+00:00 host app web.1 - Error R14 (Memory quota exceeded)"#,
        );
        let metrics = Metrics::new();
        let mut token = "t.header".to_string();
        let point = parse_line(&record, &mut token, &metrics, false).expect("point emitted");
        assert!(matches!(point.kind, SeriesKind::DynoEvent));
        assert_eq!(
            point.values,
            vec![
                Value::I64(1704164645123456),
                Value::Str("web.1".to_string()),
                Value::Str("R".to_string()),
                Value::I64(14),
                Value::Str("Error R14 (Memory quota exceeded)".to_string()),
                Value::Str("web".to_string()),
            ]
        );
    }

    #[test]
    fn name_token_override_persists_for_rest_of_batch() {
        let metrics = Metrics::new();
        let mut token = String::new();

        let first = frame_one(
            r#"<158>1 2024-01-02T03:04:05.123456+00:00 host t.override router - code=blank-app"#,
        );
        parse_line(&first, &mut token, &metrics, false);
        assert_eq!(token, "t.override");

        let second = frame_one(
            r#"<14>1 2024-01-02T03:04:06.000000+00:00 host plain-name web.1 - Error R14 (oops)"#,
        );
        let point = parse_line(&second, &mut token, &metrics, false).expect("point emitted");
        assert_eq!(point.token, "t.override");
    }

    #[test]
    fn missing_token_is_counted_and_skipped() {
        let metrics = Metrics::new();
        let mut token = String::new();
        let record = frame_one(
            r#"<14>1 2024-01-02T03:04:05.123456+00:00 host plain-name web.1 - Error R14 (oops)"#,
        );
        assert!(parse_line(&record, &mut token, &metrics, false).is_none());
    }

    #[test]
    fn unknown_dyno_line_is_counted_and_skipped() {
        let metrics = Metrics::new();
        let mut token = "t.x".to_string();
        let record = frame_one(
            r#"<14>1 2024-01-02T03:04:05.123456+00:00 host app web.1 - some unrelated line"#,
        );
        assert!(parse_line(&record, &mut token, &metrics, false).is_none());
    }

    #[test]
    fn router_request_with_bad_numeric_field_is_rejected() {
        let metrics = Metrics::new();
        let mut token = "t.x".to_string();
        let record = frame_one(
            r#"<158>1 2024-01-02T03:04:05.123456+00:00 host t.x router - at=info status=notanumber service=42ms connect=1ms"#,
        );
        assert!(parse_line(&record, &mut token, &metrics, false).is_none());
    }

    #[test]
    fn bad_timestamp_is_counted_and_skipped() {
        let metrics = Metrics::new();
        let mut token = "t.x".to_string();
        let record =
            frame_one(r#"<158>1 not-a-timestamp host t.x router - at=info status=200 service=42ms connect=1ms"#);
        assert!(parse_line(&record, &mut token, &metrics, false).is_none());
    }

    #[test]
    fn dyno_type_splits_on_first_dot() {
        assert_eq!(dyno_type("web.1"), "web");
        assert_eq!(dyno_type("heroku.1.uuid"), "heroku");
        assert_eq!(dyno_type("noextension"), "noextension");
    }
}
