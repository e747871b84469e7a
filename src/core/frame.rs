//! Purpose: Decode the newline-delimited JSON body of a `Listen` response into frames.
//! Exports: `Frame`, `LineDecoder`, `decode_line`, `MAX_FRAME_BYTES`.
//! Role: Pure codec used by the HTTP transport reader; no I/O.
//! Invariants: Lines are yielded in arrival order; partial lines are held until complete.
//! Invariants: Blank lines are keepalives and decode to nothing.
//! Invariants: A status frame is terminal; callers stop reading after it.
use super::error::{Error, ErrorKind};
use super::event::ChangeEvent;
use super::status::Status;
use bytes::{Buf, BytesMut};
use serde::Deserialize;
use serde_json::Value;

/// Upper bound for a single encoded frame.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug)]
pub enum Frame {
    Event(ChangeEvent),
    Status(Status),
    Error(Error),
}

impl Frame {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Frame::Event(_))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireFrame {
    Event(Value),
    Status(Status),
}

pub fn decode_line(line: &[u8]) -> Result<Option<Frame>, Error> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let wire: WireFrame = serde_json::from_slice(line).map_err(|err| {
        Error::new(ErrorKind::Protocol)
            .with_message("invalid listen frame")
            .with_source(err)
    })?;
    Ok(Some(match wire {
        WireFrame::Event(value) => Frame::Event(ChangeEvent::new(value)),
        WireFrame::Status(status) => Frame::Status(status),
    }))
}

#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
    scanned: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Returns the next complete line without its terminator.
    pub fn next_line(&mut self) -> Result<Option<BytesMut>, Error> {
        match self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            Some(pos) => {
                let end = self.scanned + pos;
                self.scanned = 0;
                let crlf = end > 0 && self.buf[end - 1] == b'\r';
                let len = if crlf { end - 1 } else { end };
                if len > MAX_FRAME_BYTES {
                    return Err(oversized_frame());
                }
                let mut line = self.buf.split_to(end);
                self.buf.advance(1);
                line.truncate(len);
                Ok(Some(line))
            }
            None => {
                self.scanned = self.buf.len();
                // A pending `\r` may still be the first half of a CRLF terminator.
                let pending = match self.buf.last() {
                    Some(b'\r') => self.scanned - 1,
                    _ => self.scanned,
                };
                if pending > MAX_FRAME_BYTES {
                    return Err(oversized_frame());
                }
                Ok(None)
            }
        }
    }

    /// Consumes whatever is buffered once the body has ended.
    ///
    /// A final frame without a trailing newline is accepted; anything that
    /// does not decode means the body was cut short.
    pub fn finish(&mut self) -> Result<Option<Frame>, Error> {
        let rest = self.buf.split();
        self.scanned = 0;
        if rest.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        decode_line(&rest).map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message("listen stream ended inside a frame")
                .with_source(err)
        })
    }
}

fn oversized_frame() -> Error {
    Error::new(ErrorKind::Protocol)
        .with_message(format!("listen frame exceeds {MAX_FRAME_BYTES} bytes"))
}

#[cfg(test)]
mod tests {
    use super::{Frame, LineDecoder, MAX_FRAME_BYTES, decode_line};
    use crate::core::error::ErrorKind;
    use crate::core::status::Code;
    use serde_json::json;

    fn lines(decoder: &mut LineDecoder) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = decoder.next_line().expect("line") {
            out.push(String::from_utf8(line.to_vec()).expect("utf8"));
        }
        out
    }

    #[test]
    fn splits_lines_across_chunks() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"{\"event\":{\"a\"");
        assert!(lines(&mut decoder).is_empty());
        decoder.push(b":1}}\r\n{\"event\":{}}\n{\"sta");
        assert_eq!(
            lines(&mut decoder),
            vec![r#"{"event":{"a":1}}"#, r#"{"event":{}}"#]
        );
        decoder.push(b"tus\":{\"code\":0}}\n");
        assert_eq!(lines(&mut decoder), vec![r#"{"status":{"code":0}}"#]);
        assert!(decoder.finish().expect("finish").is_none());
    }

    #[test]
    fn decodes_event_and_status_frames() {
        match decode_line(br#"{"event":{"table":"orders"}}"#).expect("frame") {
            Some(Frame::Event(event)) => {
                assert_eq!(event.as_value(), &json!({"table": "orders"}))
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        match decode_line(br#"{"status":{"code":14,"message":"draining"}}"#).expect("frame") {
            Some(Frame::Status(status)) => {
                assert_eq!(status.code, Code::Unavailable);
                assert_eq!(status.message, "draining");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn blank_lines_are_keepalives() {
        assert!(decode_line(b"").expect("blank").is_none());
        assert!(decode_line(b"  \t").expect("blank").is_none());
    }

    #[test]
    fn malformed_line_is_protocol_error() {
        let err = decode_line(b"{\"bogus\":1}").expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        let err = decode_line(b"not json").expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn finish_accepts_unterminated_final_frame() {
        let mut decoder = LineDecoder::new();
        decoder.push(br#"{"event":{"n":1}}"#);
        assert!(decoder.next_line().expect("line").is_none());
        assert!(matches!(decoder.finish(), Ok(Some(Frame::Event(_)))));
    }

    #[test]
    fn finish_reports_truncated_frame_as_transport_error() {
        let mut decoder = LineDecoder::new();
        decoder.push(br#"{"event":{"n":"#);
        let err = decoder.finish().expect_err("truncated");
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn status_frames_are_terminal() {
        let frame = decode_line(br#"{"status":{"code":0}}"#)
            .expect("frame")
            .expect("some");
        assert!(frame.is_terminal());
        let frame = decode_line(br#"{"event":{}}"#).expect("frame").expect("some");
        assert!(!frame.is_terminal());
    }

    fn padded_event(len: usize) -> Vec<u8> {
        let mut line = br#"{"event":{"pad":""#.to_vec();
        let tail = br#""}}"#;
        line.resize(len - tail.len(), b'x');
        line.extend_from_slice(tail);
        line
    }

    #[test]
    fn unterminated_line_over_limit_is_rejected() {
        let mut decoder = LineDecoder::new();
        decoder.push(&vec![b'x'; MAX_FRAME_BYTES + 1]);
        let err = decoder.next_line().expect_err("oversized");
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn terminated_line_over_limit_is_rejected() {
        let mut decoder = LineDecoder::new();
        let mut line = padded_event(MAX_FRAME_BYTES + 1);
        line.push(b'\n');
        decoder.push(&line);
        let err = decoder.next_line().expect_err("oversized");
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn line_at_limit_is_accepted_with_either_terminator() {
        for terminator in [&b"\n"[..], &b"\r\n"[..]] {
            let mut decoder = LineDecoder::new();
            let line = padded_event(MAX_FRAME_BYTES);
            let (head, tail) = line.split_at(MAX_FRAME_BYTES / 2);
            decoder.push(head);
            assert!(decoder.next_line().expect("partial").is_none());
            decoder.push(tail);
            decoder.push(&terminator[..1]);
            if terminator.len() == 2 {
                assert!(decoder.next_line().expect("pending cr").is_none());
                decoder.push(&terminator[1..]);
            }
            let decoded = decoder.next_line().expect("line").expect("some");
            assert_eq!(decoded.len(), MAX_FRAME_BYTES);
            assert!(matches!(decode_line(&decoded), Ok(Some(Frame::Event(_)))));
        }
    }
}
