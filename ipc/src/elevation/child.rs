//! Elevated side of the relaunch channel
//!
//! The relaunched instance strips its session arguments, connects to the
//! three session endpoints and moves them onto fds 0, 1 and 2. From then on
//! every prompt goes through [`Prompter::Relayed`].

use super::prompt::{decode_secret_frame, PromptKind, INPUT_REQUEST, SECRET_FRAME_LEN};
use super::{endpoint_path, is_valid_session_id, terminal, Endpoint, DIR_ARG, SESSION_ARG};
use crate::{IpcError, Result};
use std::io::{self, BufRead, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

static ATTACHED: AtomicBool = AtomicBool::new(false);
static INPUT_ENDPOINT: OnceLock<UnixStream> = OnceLock::new();

/// Session coordinates carried on the relaunched command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionArgs {
    pub session_id: String,
    pub directory: PathBuf,
}

/// Remove the session arguments from `args`
///
/// Both `--flag value` and `--flag=value` forms are accepted. Returns the
/// session when an id was present, together with the remaining arguments.
pub fn split_elevation_args(args: Vec<String>) -> Result<(Option<SessionArgs>, Vec<String>)> {
    let mut session_id = None;
    let mut directory = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg.clone(), None),
        };
        let slot = if flag == SESSION_ARG {
            &mut session_id
        } else if flag == DIR_ARG {
            &mut directory
        } else {
            rest.push(arg);
            continue;
        };
        let value = match inline {
            Some(value) => value,
            None => iter
                .next()
                .ok_or_else(|| IpcError::ElevationFailed(format!("{} needs a value", flag)))?,
        };
        *slot = Some(value);
    }

    let Some(session_id) = session_id else {
        return Ok((None, rest));
    };
    if !is_valid_session_id(&session_id) {
        return Err(IpcError::ElevationFailed(format!(
            "malformed session id '{}'",
            session_id
        )));
    }
    let directory = directory.map(PathBuf::from).unwrap_or_else(std::env::temp_dir);
    Ok((
        Some(SessionArgs {
            session_id,
            directory,
        }),
        rest,
    ))
}

/// Connect to the input, output and error endpoints, in that order
pub fn connect_endpoints(directory: &Path, session_id: &str) -> Result<[UnixStream; 3]> {
    let connect = |endpoint: Endpoint| {
        let path = endpoint_path(directory, session_id, endpoint);
        UnixStream::connect(&path)
            .map_err(|e| IpcError::ElevationFailed(format!("connect {:?}: {}", path, e)))
    };
    Ok([
        connect(Endpoint::Input)?,
        connect(Endpoint::Output)?,
        connect(Endpoint::Error)?,
    ])
}

/// Connect to the session and replace stdin, stdout and stderr with it
pub fn attach(session: &SessionArgs) -> Result<()> {
    let streams = connect_endpoints(&session.directory, &session.session_id)?;
    io::stdout().flush().ok();
    io::stderr().flush().ok();
    for (stream, fd) in streams.iter().zip([0, 1, 2]) {
        nix::unistd::dup2(stream.as_raw_fd(), fd)
            .map_err(|e| IpcError::ElevationFailed(format!("dup2 onto fd {}: {}", fd, e)))?;
    }
    let [input, _, _] = streams;
    let _ = INPUT_ENDPOINT.set(input);
    ATTACHED.store(true, Ordering::SeqCst);
    Ok(())
}

/// Whether this process's stdio is a relaunch session
pub fn is_attached() -> bool {
    ATTACHED.load(Ordering::SeqCst)
}

/// Asks the user for input, locally or through the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompter {
    /// Read from the controlling terminal
    Terminal,
    /// Write marked prompts for the relaying parent
    Relayed,
}

impl Prompter {
    /// Pick the prompter matching how this process was started
    pub fn detect() -> Self {
        if is_attached() {
            Prompter::Relayed
        } else {
            Prompter::Terminal
        }
    }

    pub fn read_visible(self, text: &str) -> io::Result<String> {
        self.ask(text, PromptKind::Visible)
    }

    pub fn read_secret(self, text: &str) -> io::Result<String> {
        self.ask(text, PromptKind::Secret)
    }

    /// Read one line after the caller has printed its own prompt text
    pub fn read_plain_line(self) -> io::Result<String> {
        match self {
            Prompter::Terminal => terminal::read_line(),
            Prompter::Relayed => {
                io::stdout().flush()?;
                let stdin = io::stdin();
                match INPUT_ENDPOINT.get() {
                    Some(endpoint) => relayed_plain_line(&mut stdin.lock(), &mut &*endpoint),
                    None => relayed_plain_line(&mut stdin.lock(), &mut io::sink()),
                }
            }
        }
    }

    /// Ask a yes/no question; anything but `y`/`yes` is a no
    pub fn confirm(self, text: &str) -> io::Result<bool> {
        let answer = self.read_visible(text)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    fn ask(self, text: &str, kind: PromptKind) -> io::Result<String> {
        match self {
            Prompter::Terminal => {
                terminal::show(text)?;
                match kind {
                    PromptKind::Visible => terminal::read_line(),
                    PromptKind::Secret => terminal::read_hidden_line(),
                }
            }
            Prompter::Relayed => {
                let stdin = io::stdin();
                relayed_prompt(&mut stdin.lock(), &mut io::stdout(), text, kind)
            }
        }
    }
}

/// Send an input request and read one line
pub fn relayed_plain_line<R: BufRead, W: Write>(
    reader: &mut R,
    requests: &mut W,
) -> io::Result<String> {
    requests.write_all(&[INPUT_REQUEST])?;
    requests.flush()?;
    read_trimmed_line(reader)
}

fn read_trimmed_line<R: BufRead>(reader: &mut R) -> io::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Write `text` plus the marker and read the answer back
pub fn relayed_prompt<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    text: &str,
    kind: PromptKind,
) -> io::Result<String> {
    writer.write_all(text.as_bytes())?;
    writer.write_all(&[kind.marker()])?;
    writer.flush()?;

    match kind {
        PromptKind::Visible => read_trimmed_line(reader),
        PromptKind::Secret => {
            let mut frame = [0u8; SECRET_FRAME_LEN];
            reader.read_exact(&mut frame)?;
            Ok(decode_secret_frame(&frame))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::prompt::{classify_tail, encode_answer};
    use std::io::Cursor;

    const ID: &str = "abcdefghijklmnopqrstuvwxyz012345";

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_strips_session_arguments() {
        let (session, rest) = split_elevation_args(args(&[
            "warden",
            "--config",
            "app.toml",
            SESSION_ARG,
            ID,
            "--elevation-dir=/run/warden",
            "install",
        ]))
        .unwrap();
        assert_eq!(
            session,
            Some(SessionArgs {
                session_id: ID.to_string(),
                directory: PathBuf::from("/run/warden"),
            })
        );
        assert_eq!(rest, args(&["warden", "--config", "app.toml", "install"]));
    }

    #[test]
    fn test_split_without_session_keeps_everything() {
        let (session, rest) = split_elevation_args(args(&["warden", "status"])).unwrap();
        assert_eq!(session, None);
        assert_eq!(rest, args(&["warden", "status"]));
    }

    #[test]
    fn test_split_rejects_malformed_ids() {
        let err = split_elevation_args(args(&["warden", SESSION_ARG, "../../etc/x"])).unwrap_err();
        assert_eq!(err.code(), "IPC010");
        let err = split_elevation_args(args(&["warden", SESSION_ARG])).unwrap_err();
        assert!(err.to_string().contains("needs a value"));
    }

    #[test]
    fn test_relayed_visible_prompt_round_trip() {
        let mut reader = Cursor::new(encode_answer(PromptKind::Visible, "yes"));
        let mut written = Vec::new();
        let answer =
            relayed_prompt(&mut reader, &mut written, "Continue? (y/n)", PromptKind::Visible)
                .unwrap();
        assert_eq!(answer, "yes");
        assert_eq!(written, b"Continue? (y/n)n");
        assert_eq!(classify_tail(&written).unwrap().text, "Continue? (y/n)");
    }

    #[test]
    fn test_relayed_secret_prompt_reads_whole_frame() {
        let mut input = encode_answer(PromptKind::Secret, "hunter2");
        input.extend_from_slice(b"next\n");
        let mut reader = Cursor::new(input);
        let mut written = Vec::new();
        let answer =
            relayed_prompt(&mut reader, &mut written, "Password:", PromptKind::Secret).unwrap();
        assert_eq!(answer, "hunter2");
        assert_eq!(written, b"Password:p");

        let mut rest = String::new();
        reader.read_line(&mut rest).unwrap();
        assert_eq!(rest, "next\n");
    }

    #[test]
    fn test_plain_line_sends_input_request() {
        let mut reader = Cursor::new(b"alice\r\n".to_vec());
        let mut requests = Vec::new();
        let answer = relayed_plain_line(&mut reader, &mut requests).unwrap();
        assert_eq!(answer, "alice");
        assert_eq!(requests, vec![INPUT_REQUEST]);
    }

    #[test]
    fn test_prompter_defaults_to_terminal() {
        assert_eq!(Prompter::detect(), Prompter::Terminal);
    }
}
