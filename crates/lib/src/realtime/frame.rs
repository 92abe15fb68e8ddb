//! STOMP 1.2 frames as carried in WebSocket text messages.
//!
//! Wire form: `COMMAND\nheader:value\n...\n\nbody\0`. A message consisting only of EOLs is a
//! heart-beat. Header values are escaped (`\\`, `\n`, `\r`, `\c`) on every frame except
//! CONNECT and CONNECTED.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),
    #[error("frame body is not NUL-terminated")]
    Unterminated,
}

/// Client and server commands used by the realtime client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }

    fn parse(s: &str) -> Result<Self, FrameError> {
        Ok(match s {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "SEND" => Command::Send,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "DISCONNECT" => Command::Disconnect,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }

    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`; repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT with version, host, heart-beat offer and optional bearer token.
    pub fn connect(host: &str, heartbeat: (u64, u64), token: Option<&str>) -> Self {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", format!("{},{}", heartbeat.0, heartbeat.1));
        if let Some(t) = token {
            frame = frame.header("Authorization", format!("Bearer {}", t));
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode one frame. `Ok(None)` means the text was a heart-beat.
    pub fn decode(text: &str) -> Result<Option<Frame>, FrameError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }
        let (command_line, mut rest) = split_line(text).ok_or(FrameError::Empty)?;
        let command = Command::parse(command_line)?;
        let unescape = command.escapes_headers();

        let mut headers = Vec::new();
        loop {
            let (line, after) = split_line(rest).ok_or(FrameError::Unterminated)?;
            rest = after;
            if line.is_empty() {
                break;
            }
            let (k, v) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if unescape {
                headers.push((unescape_header(k)?, unescape_header(v)?));
            } else {
                headers.push((k.to_string(), v.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(v.clone()))
            })
            .transpose()?;
        let body = match content_length {
            Some(n) => {
                if rest.len() < n || !rest.is_char_boundary(n) {
                    return Err(FrameError::InvalidContentLength(n.to_string()));
                }
                if rest.as_bytes().get(n) != Some(&0) {
                    return Err(FrameError::Unterminated);
                }
                &rest[..n]
            }
            None => {
                let end = rest.find('\0').ok_or(FrameError::Unterminated)?;
                &rest[..end]
            }
        };

        Ok(Some(Frame {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

/// Next line without its EOL (`\n` or `\r\n`), and the remainder after it.
fn split_line(s: &str) -> Option<(&str, &str)> {
    let i = s.find('\n')?;
    let line = &s[..i];
    let line = line.strip_suffix('\r').unwrap_or(line);
    Some((line, &s[i + 1..]))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(s.to_string())),
        }
    }
    Ok(out)
}

/// Negotiated heart-beat periods: (how often we send, how long we tolerate silence before
/// the peer is considered gone). `None` disables that direction.
pub fn negotiate_heartbeat(
    client: (u64, u64),
    server_header: Option<&str>,
) -> (Option<Duration>, Option<Duration>) {
    let (sx, sy) = server_header
        .and_then(|h| {
            let (a, b) = h.split_once(',')?;
            Some((a.trim().parse::<u64>().ok()?, b.trim().parse::<u64>().ok()?))
        })
        .unwrap_or((0, 0));
    let (cx, cy) = client;
    let outgoing = if cx == 0 || sy == 0 {
        None
    } else {
        Some(Duration::from_millis(cx.max(sy)))
    };
    let incoming = if cy == 0 || sx == 0 {
        None
    } else {
        Some(Duration::from_millis(cy.max(sx) * 2))
    };
    (outgoing, incoming)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_subscribe() {
        let text = Frame::subscribe("sub-0", "/topic/response/session-123").encode();
        assert_eq!(
            text,
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/response/session-123\nack:auto\n\n\0"
        );
    }

    #[test]
    fn encode_connect_does_not_escape() {
        let text = Frame::connect("localhost", (4000, 4000), Some("abc")).encode();
        assert!(text.starts_with("CONNECT\naccept-version:1.2\nhost:localhost\n"));
        assert!(text.contains("heart-beat:4000,4000\n"));
        assert!(text.contains("Authorization:Bearer abc\n"));
        assert!(text.ends_with("\n\n\0"));
    }

    #[test]
    fn decode_message_with_json_body() {
        let text = "MESSAGE\ndestination:/topic/response/s\nsubscription:sub-4\nmessage-id:1\ncontent-type:application/json\n\n{\"content\":\"Consider ETFs\"}\0";
        let frame = Frame::decode(text).unwrap().unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("subscription"), Some("sub-4"));
        assert_eq!(frame.body, "{\"content\":\"Consider ETFs\"}");
    }

    #[test]
    fn decode_honours_content_length_with_embedded_nul() {
        let text = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frame = Frame::decode(text).unwrap().unwrap();
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn decode_crlf_and_escaped_headers() {
        let text = "ERROR\r\nmessage:bad\\cthing\\nhappened\r\n\r\n\0";
        let frame = Frame::decode(text).unwrap().unwrap();
        assert_eq!(frame.command, Command::Error);
        assert_eq!(frame.get("message"), Some("bad:thing\nhappened"));
    }

    #[test]
    fn header_escaping_survives_encode_decode() {
        let frame = Frame::new(Command::Send)
            .header("destination", "/app/x")
            .header("note", "a:b\\c\nd")
            .with_body("hello");
        let decoded = Frame::decode(&frame.encode()).unwrap().unwrap();
        assert_eq!(decoded.get("note"), Some("a:b\\c\nd"));
        assert_eq!(decoded.body, "hello");
    }

    #[test]
    fn repeated_header_keeps_first_value() {
        let frame = Frame::decode("MESSAGE\nfoo:1\nfoo:2\n\n\0").unwrap().unwrap();
        assert_eq!(frame.get("foo"), Some("1"));
    }

    #[test]
    fn heartbeat_is_not_a_frame() {
        assert_eq!(Frame::decode("\n").unwrap(), None);
        assert_eq!(Frame::decode("\r\n\n").unwrap(), None);
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(matches!(
            Frame::decode("BOGUS\n\n\0"),
            Err(FrameError::UnknownCommand(_))
        ));
        assert!(matches!(
            Frame::decode("MESSAGE\nno-colon\n\n\0"),
            Err(FrameError::MalformedHeader(_))
        ));
        assert!(matches!(
            Frame::decode("MESSAGE\nx:1\n\nbody"),
            Err(FrameError::Unterminated)
        ));
        assert!(matches!(
            Frame::decode("MESSAGE\nx:\\q\n\n\0"),
            Err(FrameError::InvalidEscape(_))
        ));
        assert!(matches!(
            Frame::decode("MESSAGE\ncontent-length:99\n\nab\0"),
            Err(FrameError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn heartbeat_negotiation() {
        assert_eq!(
            negotiate_heartbeat((4000, 4000), Some("10000,10000")),
            (
                Some(Duration::from_millis(10000)),
                Some(Duration::from_millis(20000))
            )
        );
        assert_eq!(negotiate_heartbeat((4000, 4000), Some("0,0")), (None, None));
        assert_eq!(negotiate_heartbeat((0, 4000), Some("1000,1000")).0, None);
        assert_eq!(negotiate_heartbeat((4000, 4000), None), (None, None));
    }
}
