//! SockJS framing.
//!
//! The exam-workflow endpoint is a SockJS endpoint. Every transport message
//! from the server starts with a one-letter frame type:
//!
//! | Prefix | Meaning |
//! |--------|---------|
//! | `o` | session open |
//! | `h` | heart-beat |
//! | `a[...]` | JSON array of messages |
//! | `m"..."` | single JSON-encoded message |
//! | `c[code,"reason"]` | session closed |
//!
//! Outbound messages are sent as a JSON array of strings.

use crate::error::{ProtocolError, ProtocolResult};

/// A decoded SockJS frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    Open,
    HeartBeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

/// Decodes one SockJS frame.
///
/// XHR polling responses end with a newline, which is ignored.
pub fn decode_frame(raw: &str) -> ProtocolResult<SockJsFrame> {
    let raw = raw.trim_end_matches(['\n', '\r']);
    let mut chars = raw.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ProtocolError::SockJs("empty frame".to_string()))?;
    let rest = chars.as_str();

    match kind {
        'o' => Ok(SockJsFrame::Open),
        'h' => Ok(SockJsFrame::HeartBeat),
        'a' => {
            let messages: Vec<String> = serde_json::from_str(rest)?;
            Ok(SockJsFrame::Messages(messages))
        }
        'm' => {
            let message: String = serde_json::from_str(rest)?;
            Ok(SockJsFrame::Messages(vec![message]))
        }
        'c' => {
            let (code, reason): (u16, String) = serde_json::from_str(rest)?;
            Ok(SockJsFrame::Close { code, reason })
        }
        other => Err(ProtocolError::SockJs(format!(
            "unknown frame type {:?}",
            other
        ))),
    }
}

/// Encodes outbound messages for `send` / `xhr_send`.
pub fn encode_messages<S: AsRef<str>>(messages: &[S]) -> ProtocolResult<String> {
    let messages: Vec<&str> = messages.iter().map(AsRef::as_ref).collect();
    Ok(serde_json::to_string(&messages)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frames() {
        assert_eq!(decode_frame("o").unwrap(), SockJsFrame::Open);
        assert_eq!(decode_frame("h\n").unwrap(), SockJsFrame::HeartBeat);
    }

    #[test]
    fn message_array_carries_stomp_text() {
        let frame = decode_frame(r#"a["CONNECTED\nversion:1.2\n\n\u0000"]"#).unwrap();
        assert_eq!(
            frame,
            SockJsFrame::Messages(vec!["CONNECTED\nversion:1.2\n\n\0".to_string()])
        );
    }

    #[test]
    fn single_message_frame() {
        let frame = decode_frame(r#"m"\n""#).unwrap();
        assert_eq!(frame, SockJsFrame::Messages(vec!["\n".to_string()]));
    }

    #[test]
    fn close_frame() {
        let frame = decode_frame(r#"c[3000,"Go away!"]"#).unwrap();
        assert_eq!(
            frame,
            SockJsFrame::Close {
                code: 3000,
                reason: "Go away!".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_and_empty_frames() {
        assert!(matches!(decode_frame("x"), Err(ProtocolError::SockJs(_))));
        assert!(matches!(decode_frame(""), Err(ProtocolError::SockJs(_))));
        assert!(matches!(
            decode_frame("a[1,2]"),
            Err(ProtocolError::Serialization(_))
        ));
    }

    #[test]
    fn outbound_is_a_json_array() {
        let encoded = encode_messages(&["SEND\ndestination:/app/x\n\n\0"]).unwrap();
        insta::assert_snapshot!(encoded, @r#"["SEND\ndestination:/app/x\n\n\u0000"]"#);
    }
}
