//! Relay between the elevated instance's streams and the local terminal
//!
//! Complete output lines are printed as they arrive. An unterminated tail is
//! held back; once it has been idle for one poll interval it is checked for a
//! prompt marker. A tail without a marker becomes a visible prompt only while
//! the elevated side has an input request outstanding. Without one it is
//! printed as plain output after the generic wait. Error output is never held
//! back.

use super::prompt::{
    classify_tail, encode_answer, generic_prompt, Prompt, PromptKind, INPUT_REQUEST,
};
use super::terminal;
use crate::{IpcError, Result};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::debug;

const READ_CHUNK: usize = 4096;

/// The three connected endpoints of a session, seen from the relaying side
#[allow(missing_debug_implementations)]
pub struct SessionStreams {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    /// Read half of the input endpoint, carrying input requests
    pub input_requests: Box<dyn AsyncRead + Send + Unpin>,
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub error: Box<dyn AsyncRead + Send + Unpin>,
}

#[derive(Debug, Clone, Copy)]
pub struct RelayTiming {
    pub poll_interval: Duration,
    pub generic_prompt_wait: Duration,
}

/// Local side of the relay
#[async_trait::async_trait]
pub trait RelayConsole: Send {
    async fn write_output(&mut self, bytes: &[u8]) -> io::Result<()>;
    async fn write_error(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Show the prompt text and read the answer
    async fn answer(&mut self, prompt: &Prompt) -> io::Result<String>;
}

/// Console backed by this process's stdio
#[derive(Debug, Default)]
pub struct TerminalConsole;

#[async_trait::async_trait]
impl RelayConsole for TerminalConsole {
    async fn write_output(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(bytes).await?;
        stdout.flush().await
    }

    async fn write_error(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut stderr = tokio::io::stderr();
        stderr.write_all(bytes).await?;
        stderr.flush().await
    }

    async fn answer(&mut self, prompt: &Prompt) -> io::Result<String> {
        let text = prompt.text.clone();
        let kind = prompt.kind;
        tokio::task::spawn_blocking(move || {
            terminal::show(&text)?;
            match kind {
                PromptKind::Visible => terminal::read_line(),
                PromptKind::Secret => terminal::read_hidden_line(),
            }
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

/// Relay until both output and error reach end of stream
pub async fn relay(
    streams: SessionStreams,
    console: &mut dyn RelayConsole,
    timing: RelayTiming,
) -> Result<()> {
    let SessionStreams {
        mut input,
        mut input_requests,
        mut output,
        mut error,
    } = streams;
    let mut out_buf = [0u8; READ_CHUNK];
    let mut err_buf = [0u8; READ_CHUNK];
    let mut req_buf = [0u8; 64];
    let mut requests_open = true;
    let mut pending_requests = 0usize;
    let mut tail: Vec<u8> = Vec::new();
    let mut last_output = Instant::now();
    let mut output_open = true;
    let mut error_open = true;

    while output_open || error_open {
        tokio::select! {
            read = output.read(&mut out_buf), if output_open => {
                let n = read.map_err(relay_error("read elevated output"))?;
                if n == 0 {
                    output_open = false;
                    if !tail.is_empty() {
                        console.write_output(&tail).await.map_err(relay_error("print output"))?;
                        tail.clear();
                    }
                    continue;
                }
                tail.extend_from_slice(&out_buf[..n]);
                last_output = Instant::now();
                if let Some(pos) = tail.iter().rposition(|b| *b == b'\n') {
                    let rest = tail.split_off(pos + 1);
                    console.write_output(&tail).await.map_err(relay_error("print output"))?;
                    tail = rest;
                }
            }
            read = error.read(&mut err_buf), if error_open => {
                let n = read.map_err(relay_error("read elevated error output"))?;
                if n == 0 {
                    error_open = false;
                } else {
                    console.write_error(&err_buf[..n]).await.map_err(relay_error("print error output"))?;
                }
            }
            read = input_requests.read(&mut req_buf), if requests_open => {
                match read {
                    Ok(0) => requests_open = false,
                    Ok(n) => {
                        pending_requests += req_buf[..n].iter().filter(|b| **b == INPUT_REQUEST).count();
                        last_output = Instant::now();
                    }
                    Err(e) => {
                        debug!("Input request channel closed: {}", e);
                        requests_open = false;
                    }
                }
            }
            _ = tokio::time::sleep(timing.poll_interval), if output_open && (!tail.is_empty() || pending_requests > 0) => {
                let idle = last_output.elapsed();
                if idle < timing.poll_interval {
                    continue;
                }
                let prompt = if let Some(prompt) = classify_tail(&tail) {
                    prompt
                } else if pending_requests > 0 {
                    pending_requests -= 1;
                    generic_prompt(&tail).unwrap_or(Prompt {
                        kind: PromptKind::Visible,
                        text: String::new(),
                    })
                } else {
                    if idle >= timing.generic_prompt_wait {
                        console.write_output(&tail).await.map_err(relay_error("print output"))?;
                        tail.clear();
                    }
                    continue;
                };
                debug!("Relaying {:?} prompt", prompt.kind);
                tail.clear();
                let answer = console.answer(&prompt).await.map_err(relay_error("read prompt answer"))?;
                input
                    .write_all(&encode_answer(prompt.kind, &answer))
                    .await
                    .map_err(relay_error("send prompt answer"))?;
                input.flush().await.map_err(relay_error("send prompt answer"))?;
                last_output = Instant::now();
            }
        }
    }
    Ok(())
}

fn relay_error(what: &'static str) -> impl Fn(io::Error) -> IpcError {
    move |e| IpcError::ElevationFailed(format!("{}: {}", what, e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::elevation::prompt::{decode_secret_frame, SECRET_FRAME_LEN};
    use std::collections::VecDeque;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream};

    /// Console with scripted answers that records everything shown
    #[derive(Default)]
    pub(crate) struct ScriptedConsole {
        pub output: Vec<u8>,
        pub error: Vec<u8>,
        pub prompts: Vec<Prompt>,
        pub answers: VecDeque<String>,
    }

    #[async_trait::async_trait]
    impl RelayConsole for ScriptedConsole {
        async fn write_output(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.output.extend_from_slice(bytes);
            Ok(())
        }

        async fn write_error(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.error.extend_from_slice(bytes);
            Ok(())
        }

        async fn answer(&mut self, prompt: &Prompt) -> io::Result<String> {
            self.prompts.push(prompt.clone());
            self.answers
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer"))
        }
    }

    fn session(input: DuplexStream, output: DuplexStream, error: DuplexStream) -> SessionStreams {
        let (requests, input) = tokio::io::split(input);
        SessionStreams {
            input: Box::new(input),
            input_requests: Box::new(requests),
            output: Box::new(output),
            error: Box::new(error),
        }
    }

    fn timing() -> RelayTiming {
        RelayTiming {
            poll_interval: Duration::from_millis(20),
            generic_prompt_wait: Duration::from_millis(150),
        }
    }

    #[tokio::test]
    async fn test_relay_answers_marked_prompts() {
        let (input_local, input_remote) = duplex(1024);
        let (mut output_remote, output_local) = duplex(1024);
        let (mut error_remote, error_local) = duplex(1024);

        let elevated = tokio::spawn(async move {
            let mut answers = BufReader::new(input_remote);
            output_remote.write_all(b"Removing unit\nContinue? (y/n)n").await.unwrap();
            let mut line = String::new();
            answers.read_line(&mut line).await.unwrap();
            assert_eq!(line, "y\n");

            error_remote.write_all(b"warning: unit active\n").await.unwrap();
            output_remote.write_all(b"Password:p").await.unwrap();
            let mut frame = vec![0u8; SECRET_FRAME_LEN];
            answers.read_exact(&mut frame).await.unwrap();
            assert_eq!(decode_secret_frame(&frame), "s3cret");

            output_remote.write_all(b"done\n").await.unwrap();
        });

        let mut console = ScriptedConsole {
            answers: VecDeque::from(vec!["y".to_string(), "s3cret".to_string()]),
            ..Default::default()
        };
        let streams = session(input_local, output_local, error_local);
        relay(streams, &mut console, timing()).await.unwrap();
        elevated.await.unwrap();

        assert_eq!(console.output, b"Removing unit\ndone\n");
        assert_eq!(console.error, b"warning: unit active\n");
        assert_eq!(
            console.prompts,
            vec![
                Prompt {
                    kind: PromptKind::Visible,
                    text: "Continue? (y/n)".to_string()
                },
                Prompt {
                    kind: PromptKind::Secret,
                    text: "Password:".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_relay_prompts_for_unmarked_text_on_input_request() {
        let (input_local, input_remote) = duplex(1024);
        let (mut output_remote, output_local) = duplex(1024);
        let (error_remote, error_local) = duplex(1024);
        drop(error_remote);

        let elevated = tokio::spawn(async move {
            let (reader, mut requests) = tokio::io::split(input_remote);
            let mut answers = BufReader::new(reader);
            output_remote.write_all(b"Name: ").await.unwrap();
            requests.write_all(&[INPUT_REQUEST]).await.unwrap();
            let mut line = String::new();
            answers.read_line(&mut line).await.unwrap();
            line
        });

        let mut console = ScriptedConsole {
            answers: VecDeque::from(vec!["warden".to_string()]),
            ..Default::default()
        };
        let streams = session(input_local, output_local, error_local);
        relay(streams, &mut console, timing()).await.unwrap();

        assert_eq!(elevated.await.unwrap(), "warden\n");
        assert_eq!(
            console.prompts,
            vec![Prompt {
                kind: PromptKind::Visible,
                text: "Name: ".to_string()
            }]
        );
        assert!(console.output.is_empty());
    }

    #[tokio::test]
    async fn test_idle_progress_text_is_not_a_prompt() {
        let (input_local, input_remote) = duplex(1024);
        let (mut output_remote, output_local) = duplex(1024);
        let (error_remote, error_local) = duplex(1024);
        drop(error_remote);

        let elevated = tokio::spawn(async move {
            output_remote.write_all(b"Working...").await.unwrap();
            tokio::time::sleep(Duration::from_millis(400)).await;
            output_remote.write_all(b" done\n").await.unwrap();
        });

        let mut console = ScriptedConsole::default();
        let streams = session(input_local, output_local, error_local);
        relay(streams, &mut console, timing()).await.unwrap();
        elevated.await.unwrap();

        let mut injected = Vec::new();
        let mut input_remote = input_remote;
        input_remote.read_to_end(&mut injected).await.unwrap();
        assert!(injected.is_empty());
        assert!(console.prompts.is_empty());
        assert_eq!(console.output, b"Working... done\n");
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_flushed_at_end_of_stream() {
        let (input_local, _input_remote) = duplex(64);
        let (mut output_remote, output_local) = duplex(64);
        let (error_remote, error_local) = duplex(64);
        drop(error_remote);

        output_remote.write_all(b"line\npartial").await.unwrap();
        drop(output_remote);

        let mut console = ScriptedConsole::default();
        let streams = session(input_local, output_local, error_local);
        relay(streams, &mut console, timing()).await.unwrap();

        assert_eq!(console.output, b"line\npartial");
        assert!(console.prompts.is_empty());
    }
}
