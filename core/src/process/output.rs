//! Managed process output: encoding resolution and draining
//!
//! Each complete line is decoded with the resolved encoding, logged under the
//! `warden::app` target and pushed into the shared log ring.
//!
//! ## Drain strategies
//!
//! - **Task**: one tokio task per stream reads lines until EOF.
//! - **Poll**: the main loop calls [`OutputDrain::poll`] once per tick. Each
//!   stream keeps a persistent line buffer and `read_until` is polled with
//!   `now_or_never`, so a partially received line stays buffered until its
//!   newline arrives.

use crate::logging::{LogEntry, SharedLogRing};
use futures::FutureExt;
use schema::{DrainStrategy, LogStream, OutputConfig, OutputEncoding};
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Boxed reader for one child stream
pub type OutputReader = Pin<Box<dyn AsyncRead + Send + Sync + Unpin>>;

/// Lines handled per stream per tick in poll mode
pub const POLL_LINES_PER_TICK: usize = 64;

/// Choose the output encoding.
///
/// An explicit `output.encoding` wins. Otherwise the child's locale decides:
/// the first of `LC_ALL`, `LC_CTYPE`, `LANG` that is set (in the child's
/// configured environment, then the inherited one).
pub fn resolve_encoding(
    config: &OutputConfig,
    child_env: &HashMap<String, String>,
) -> OutputEncoding {
    if let Some(encoding) = config.encoding {
        return encoding;
    }
    for key in ["LC_ALL", "LC_CTYPE", "LANG"] {
        let value = child_env
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|v| !v.is_empty());
        if let Some(locale) = value {
            return encoding_from_locale(&locale);
        }
    }
    OutputEncoding::Utf8
}

/// Map a locale name (`de_DE.ISO-8859-1`) to an encoding
pub fn encoding_from_locale(locale: &str) -> OutputEncoding {
    let codeset = locale
        .split_once('.')
        .map(|(_, rest)| rest.split('@').next().unwrap_or(rest))
        .unwrap_or("")
        .to_ascii_lowercase()
        .replace(['-', '_'], "");
    match codeset.as_str() {
        "iso88591" | "latin1" | "iso885915" => OutputEncoding::Latin1,
        _ => OutputEncoding::Utf8,
    }
}

/// Decode raw bytes, stripping the line terminator
pub fn decode_line(bytes: &[u8], encoding: OutputEncoding) -> String {
    let mut end = bytes.len();
    if end > 0 && bytes[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && bytes[end - 1] == b'\r' {
        end -= 1;
    }
    let bytes = &bytes[..end];
    match encoding {
        OutputEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        OutputEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Destination for decoded lines
#[derive(Debug, Clone)]
pub struct OutputSink {
    ring: SharedLogRing,
    encoding: OutputEncoding,
}

impl OutputSink {
    pub fn new(ring: SharedLogRing, encoding: OutputEncoding) -> Self {
        Self { ring, encoding }
    }

    pub fn encoding(&self) -> OutputEncoding {
        self.encoding
    }

    /// Log and retain one raw line
    pub fn record(&self, stream: LogStream, raw: &[u8]) {
        let line = decode_line(raw, self.encoding);
        match stream {
            LogStream::Stdout => info!(target: "warden::app", "{}", line),
            LogStream::Stderr => warn!(target: "warden::app", "{}", line),
        }
        let entry = LogEntry::new(stream, line);
        match self.ring.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

/// One stream drained by the main loop
struct PolledStream {
    stream: LogStream,
    reader: BufReader<OutputReader>,
    buf: Vec<u8>,
    eof: bool,
}

impl PolledStream {
    /// Read up to `max_lines` complete lines without waiting
    fn poll(&mut self, sink: &OutputSink, max_lines: usize) -> usize {
        let mut handled = 0;
        while !self.eof && handled < max_lines {
            match self.reader.read_until(b'\n', &mut self.buf).now_or_never() {
                None => break,
                Some(Ok(0)) => {
                    self.eof = true;
                    if !self.buf.is_empty() {
                        sink.record(self.stream, &self.buf);
                        self.buf.clear();
                        handled += 1;
                    }
                }
                Some(Ok(_)) => {
                    sink.record(self.stream, &self.buf);
                    self.buf.clear();
                    handled += 1;
                }
                Some(Err(e)) => {
                    warn!("Error reading {:?} of managed process: {}", self.stream, e);
                    self.eof = true;
                }
            }
        }
        handled
    }
}

/// Active output drain for one child
pub enum OutputDrain {
    Task { handles: Vec<JoinHandle<()>> },
    Poll { streams: Vec<PolledStream>, sink: OutputSink },
}

impl std::fmt::Debug for OutputDrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputDrain::Task { handles } => f
                .debug_struct("OutputDrain::Task")
                .field("tasks", &handles.len())
                .finish(),
            OutputDrain::Poll { streams, .. } => f
                .debug_struct("OutputDrain::Poll")
                .field("streams", &streams.len())
                .finish(),
        }
    }
}

impl OutputDrain {
    /// Start draining the given streams
    pub fn start(
        strategy: DrainStrategy,
        stdout: Option<OutputReader>,
        stderr: Option<OutputReader>,
        sink: OutputSink,
    ) -> Self {
        let readers = [(LogStream::Stdout, stdout), (LogStream::Stderr, stderr)];
        match strategy {
            DrainStrategy::Task => {
                let handles = readers
                    .into_iter()
                    .filter_map(|(stream, reader)| reader.map(|r| (stream, r)))
                    .map(|(stream, reader)| spawn_reader(stream, reader, sink.clone()))
                    .collect();
                OutputDrain::Task { handles }
            }
            DrainStrategy::Poll => {
                let streams = readers
                    .into_iter()
                    .filter_map(|(stream, reader)| reader.map(|r| (stream, r)))
                    .map(|(stream, reader)| PolledStream {
                        stream,
                        reader: BufReader::new(reader),
                        buf: Vec::new(),
                        eof: false,
                    })
                    .collect();
                OutputDrain::Poll { streams, sink }
            }
        }
    }

    /// Drain available lines (poll mode); returns the number of lines handled
    pub fn poll(&mut self, max_lines: usize) -> usize {
        match self {
            OutputDrain::Task { .. } => 0,
            OutputDrain::Poll { streams, sink } => {
                streams.iter_mut().map(|s| s.poll(sink, max_lines)).sum()
            }
        }
    }

    /// Whether every stream reached EOF
    pub fn is_finished(&self) -> bool {
        match self {
            OutputDrain::Task { handles } => handles.iter().all(|h| h.is_finished()),
            OutputDrain::Poll { streams, .. } => streams.iter().all(|s| s.eof),
        }
    }

    /// Flush what is already buffered after the child exited.
    ///
    /// Reader tasks are detached and finish on EOF by themselves.
    pub fn finish(mut self) {
        let handled = self.poll(usize::MAX);
        if handled > 0 {
            debug!("Flushed {} trailing output lines", handled);
        }
    }
}

fn spawn_reader(stream: LogStream, reader: OutputReader, sink: OutputSink) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => sink.record(stream, &buf),
                Err(e) => {
                    warn!("Error reading {:?} of managed process: {}", stream, e);
                    break;
                }
            }
        }
        debug!("{:?} reader reached EOF", stream);
    })
}
