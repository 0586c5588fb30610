//! Interactive prompt sub-protocol
//!
//! The elevated instance writes prompt text followed by a one-byte marker and
//! no newline: `n` asks for a visible line, `p` asks for a secret. Visible
//! answers travel back as one line; secrets as a fixed-size NUL-padded frame
//! so the relay never has to agree on a terminator with the prompting side.
//!
//! Code that prints its own unmarked prompt writes [`INPUT_REQUEST`] on the
//! input endpoint before blocking on a read. Only then may the relay treat an
//! unmarked tail as a prompt; otherwise the tail is ordinary output.

/// Marker ending a visible prompt
pub const VISIBLE_MARKER: u8 = b'n';

/// Marker ending a secret prompt
pub const SECRET_MARKER: u8 = b'p';

/// Sent back on the input endpoint by an elevated reader about to block
pub const INPUT_REQUEST: u8 = 0x05;

/// Size of the frame carrying a secret answer
pub const SECRET_FRAME_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Answer is echoed and sent as a line
    Visible,
    /// Answer is read without echo and sent as a padded frame
    Secret,
}

impl PromptKind {
    pub fn marker(self) -> u8 {
        match self {
            PromptKind::Visible => VISIBLE_MARKER,
            PromptKind::Secret => SECRET_MARKER,
        }
    }
}

/// A prompt detected on the relayed output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub text: String,
}

/// Classify an idle, unterminated output tail by its marker
///
/// Returns `None` for empty tails, tails containing a newline and tails that
/// end in neither marker.
pub fn classify_tail(tail: &[u8]) -> Option<Prompt> {
    if tail.contains(&b'\n') {
        return None;
    }
    let (&last, text) = tail.split_last()?;
    let kind = match last {
        VISIBLE_MARKER => PromptKind::Visible,
        SECRET_MARKER => PromptKind::Secret,
        _ => return None,
    };
    Some(Prompt {
        kind,
        text: String::from_utf8_lossy(text).into_owned(),
    })
}

/// Treat a marker-less tail as a visible prompt shown verbatim
///
/// Only valid once the elevated side has sent [`INPUT_REQUEST`].
pub fn generic_prompt(tail: &[u8]) -> Option<Prompt> {
    if tail.is_empty() || tail.contains(&b'\n') {
        return None;
    }
    Some(Prompt {
        kind: PromptKind::Visible,
        text: String::from_utf8_lossy(tail).into_owned(),
    })
}

/// Encode an answer for the elevated instance's standard input
///
/// Secrets longer than the frame are truncated so at least one NUL remains.
pub fn encode_answer(kind: PromptKind, answer: &str) -> Vec<u8> {
    match kind {
        PromptKind::Visible => {
            let mut line = Vec::with_capacity(answer.len() + 1);
            line.extend_from_slice(answer.as_bytes());
            line.push(b'\n');
            line
        }
        PromptKind::Secret => {
            let mut frame = vec![0u8; SECRET_FRAME_LEN];
            let bytes = answer.as_bytes();
            let len = bytes.len().min(SECRET_FRAME_LEN - 1);
            frame[..len].copy_from_slice(&bytes[..len]);
            frame
        }
    }
}

/// Extract the secret from a received frame
pub fn decode_secret_frame(frame: &[u8]) -> String {
    let end = frame.iter().position(|b| *b == 0).unwrap_or(frame.len());
    String::from_utf8_lossy(&frame[..end]).into_owned()
}
