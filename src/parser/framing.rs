//! Octet-counted framing for syslog-like batches (RFC 6587 style: each
//! message is prefixed by its own byte length in ASCII decimal, so frames
//! can be split without scanning for an in-band delimiter).

/// One decoded frame: the six RFC5424-style header fields plus the raw
/// UTF-8 payload that follows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedRecord {
    pub priority_version: String,
    pub timestamp: String,
    pub hostname: String,
    pub name: String,
    pub procid: String,
    pub msgid: String,
    pub payload: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame header")]
    MalformedHeader,
    #[error("truncated frame body")]
    Truncated,
    #[error("non-utf8 frame body")]
    NotUtf8,
}

/// Splits a full request body into individual octet-counted frames, then
/// decodes each frame's header fields.
pub fn tokenize(body: &[u8]) -> Vec<Result<FramedRecord, FrameError>> {
    let mut out = Vec::new();
    let mut cursor = 0usize;

    while cursor < body.len() {
        // Parse the ASCII-decimal length prefix up to the first space.
        let Some(space_idx) = body[cursor..].iter().position(|&b| b == b' ') else {
            out.push(Err(FrameError::MalformedHeader));
            break;
        };
        let len_str = match std::str::from_utf8(&body[cursor..cursor + space_idx]) {
            Ok(s) => s,
            Err(_) => {
                out.push(Err(FrameError::NotUtf8));
                break;
            }
        };
        let Ok(len) = len_str.parse::<usize>() else {
            out.push(Err(FrameError::MalformedHeader));
            break;
        };

        let content_start = cursor + space_idx + 1;
        let content_end = content_start + len;
        if content_end > body.len() {
            out.push(Err(FrameError::Truncated));
            break;
        }

        out.push(decode_frame(&body[content_start..content_end]));
        cursor = content_end;
    }

    out
}

fn decode_frame(content: &[u8]) -> Result<FramedRecord, FrameError> {
    let text = std::str::from_utf8(content).map_err(|_| FrameError::NotUtf8)?;

    // priority_version, timestamp, hostname, name, procid, msgid, then payload.
    let mut fields = Vec::with_capacity(6);
    let mut rest = text;
    for _ in 0..6 {
        let Some(space_idx) = rest.find(' ') else {
            return Err(FrameError::MalformedHeader);
        };
        fields.push(&rest[..space_idx]);
        rest = &rest[space_idx + 1..];
    }

    Ok(FramedRecord {
        priority_version: fields[0].to_string(),
        timestamp: fields[1].to_string(),
        hostname: fields[2].to_string(),
        name: fields[3].to_string(),
        procid: fields[4].to_string(),
        msgid: fields[5].to_string(),
        payload: rest.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(content: &str) -> String {
        format!("{} {}", content.len(), content)
    }

    #[test]
    fn decodes_a_single_frame() {
        let content = "<158>1 2024-01-02T03:04:05.123456+00:00 host t.abc router - at=info status=200";
        let body = frame(content);
        let frames = tokenize(body.as_bytes());
        assert_eq!(frames.len(), 1);
        let record = frames[0].as_ref().unwrap();
        assert_eq!(record.priority_version, "<158>1");
        assert_eq!(record.timestamp, "2024-01-02T03:04:05.123456+00:00");
        assert_eq!(record.hostname, "host");
        assert_eq!(record.name, "t.abc");
        assert_eq!(record.procid, "router");
        assert_eq!(record.msgid, "-");
        assert_eq!(record.payload, "at=info status=200");
    }

    #[test]
    fn decodes_multiple_frames_back_to_back() {
        let c1 = "<158>1 2024-01-02T03:04:05.000000+00:00 host t.abc router - at=info status=200";
        let c2 = "<158>1 2024-01-02T03:04:06.000000+00:00 host t.abc web.1 - Error R14 (Memory quota exceeded)";
        let body = format!("{}{}", frame(c1), frame(c2));
        let frames = tokenize(body.as_bytes());
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_ok());
        assert!(frames[1].is_ok());
        assert_eq!(frames[1].as_ref().unwrap().procid, "web.1");
    }

    #[test]
    fn empty_body_yields_no_frames() {
        assert!(tokenize(b"").is_empty());
    }

    #[test]
    fn truncated_frame_is_reported() {
        let body = "100 too short";
        let frames = tokenize(body.as_bytes());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], Err(FrameError::Truncated));
    }
}
