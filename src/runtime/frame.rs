//! Per-connection frame reassembly.
//!
//! Reads arrive in arbitrary fragments. `FrameBuffer` accumulates them and
//! hands out one newline-terminated command at a time, keeping any trailing
//! partial command for the next read.
//!
//! Each command is validated as UTF-8 when it is taken, so a multi-byte
//! character split across two reads is fine, and commands ahead of a
//! malformed one are still handed out no matter how the bytes were split.

use bytes::BytesMut;
use thiserror::Error;

/// Frame delimiter.
const DELIMITER: u8 = b'\n';

/// Framing errors. Fatal to the connection that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid UTF-8 in command at byte {0}")]
    InvalidUtf8(usize),
}

/// Accumulated, not yet delimited command text for one connection.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Whether a complete command is buffered.
    pub fn is_complete(&self) -> bool {
        self.buf.contains(&DELIMITER)
    }

    /// Remove and return the first complete command, without its line ending.
    ///
    /// Returns `Ok(None)` if no complete command is buffered. A command that
    /// is not valid UTF-8 is consumed and reported as an error; the offset is
    /// relative to the start of that command.
    pub fn take(&mut self) -> Result<Option<String>, FrameError> {
        let Some(end) = self.buf.iter().position(|&b| b == DELIMITER) else {
            return Ok(None);
        };

        let mut line = self.buf.split_to(end + 1);
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }

        match String::from_utf8(line.to_vec()) {
            Ok(line) => Ok(Some(line)),
            Err(e) => Err(FrameError::InvalidUtf8(e.utf8_error().valid_up_to())),
        }
    }

    /// Drop all buffered input.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMAND: &[u8] = b"cmd=math&eq=6*7\n";

    #[test]
    fn test_partial_frame() {
        let mut frames = FrameBuffer::new();

        frames.append(b"cmd=hel");
        assert!(!frames.is_complete());
        assert_eq!(frames.take().unwrap(), None);

        frames.append(b"lo&name=Ann\n");
        assert!(frames.is_complete());
        assert_eq!(
            frames.take().unwrap().as_deref(),
            Some("cmd=hello&name=Ann")
        );
        assert!(frames.is_empty());
    }

    #[test]
    fn test_any_split_yields_same_command() {
        for split in 0..=COMMAND.len() {
            let mut frames = FrameBuffer::new();
            frames.append(&COMMAND[..split]);
            frames.append(&COMMAND[split..]);
            assert_eq!(
                frames.take().unwrap().as_deref(),
                Some("cmd=math&eq=6*7"),
                "split at {split}"
            );
            assert!(frames.is_empty());
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut frames = FrameBuffer::new();
        for byte in COMMAND {
            assert!(!frames.is_complete());
            frames.append(std::slice::from_ref(byte));
        }
        assert_eq!(frames.take().unwrap().as_deref(), Some("cmd=math&eq=6*7"));
    }

    #[test]
    fn test_multiple_commands_in_one_read() {
        let mut frames = FrameBuffer::new();
        frames.append(b"cmd=hello&name=Bo\ncmd=math&eq=1+1\ncmd=ex");

        assert_eq!(frames.take().unwrap().as_deref(), Some("cmd=hello&name=Bo"));
        assert_eq!(frames.take().unwrap().as_deref(), Some("cmd=math&eq=1+1"));
        assert_eq!(frames.take().unwrap(), None);
        assert!(!frames.is_complete());
        assert_eq!(frames.len(), b"cmd=ex".len());

        frames.append(b"it&name=Bo\n");
        assert_eq!(frames.take().unwrap().as_deref(), Some("cmd=exit&name=Bo"));
    }

    #[test]
    fn test_crlf_stripped() {
        let mut frames = FrameBuffer::new();
        frames.append(b"cmd=exit&name=Ann\r\n");
        assert_eq!(frames.take().unwrap().as_deref(), Some("cmd=exit&name=Ann"));
    }

    #[test]
    fn test_split_multibyte_character() {
        let text = "name=Zoë\n".as_bytes();
        let split = text.iter().position(|&b| b >= 0x80).unwrap() + 1;

        let mut frames = FrameBuffer::new();
        frames.append(&text[..split]);
        frames.append(&text[split..]);
        assert_eq!(frames.take().unwrap().as_deref(), Some("name=Zoë"));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut frames = FrameBuffer::new();
        frames.append(b"cmd=");
        frames.append(&[0xff, b'\n']);
        assert_eq!(frames.take(), Err(FrameError::InvalidUtf8(4)));
        assert!(frames.is_empty());
    }

    #[test]
    fn test_commands_before_invalid_utf8_are_taken() {
        let mut frames = FrameBuffer::new();
        frames.append(b"cmd=math&eq=1+1\n\xff\ncmd=");

        assert_eq!(frames.take().unwrap().as_deref(), Some("cmd=math&eq=1+1"));
        assert_eq!(frames.take(), Err(FrameError::InvalidUtf8(0)));
        assert_eq!(frames.take(), Ok(None));
        assert_eq!(frames.len(), b"cmd=".len());
    }

    #[test]
    fn test_invalid_byte_in_partial_command_waits_for_delimiter() {
        let mut frames = FrameBuffer::new();
        frames.append(b"cmd=\xff");
        assert_eq!(frames.take(), Ok(None));
        frames.append(b"\n");
        assert_eq!(frames.take(), Err(FrameError::InvalidUtf8(4)));
    }

    #[test]
    fn test_clear() {
        let mut frames = FrameBuffer::new();
        frames.append(b"cmd=math&eq=1+1\ncmd=");
        frames.clear();
        assert!(frames.is_empty());
        assert_eq!(frames.take().unwrap(), None);
        frames.append(b"cmd=exit&name=A\n");
        assert_eq!(frames.take().unwrap().as_deref(), Some("cmd=exit&name=A"));
    }
}
