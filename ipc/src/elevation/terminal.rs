//! Blocking terminal input for prompts

use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
use std::io::{self, BufRead, Write};

/// Restores the saved terminal attributes on drop
struct EchoGuard {
    saved: Termios,
}

impl EchoGuard {
    /// Disable echo on stdin; `None` when stdin is not a terminal
    fn disable() -> Option<Self> {
        let stdin = io::stdin();
        let saved = termios::tcgetattr(&stdin).ok()?;
        let mut quiet = saved.clone();
        quiet.local_flags.remove(LocalFlags::ECHO);
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &quiet).ok()?;
        Some(Self { saved })
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &self.saved);
    }
}

/// Read one line from stdin without its terminator
pub fn read_line() -> io::Result<String> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Read one line from stdin with echo disabled
pub fn read_hidden_line() -> io::Result<String> {
    let guard = EchoGuard::disable();
    let line = read_line();
    if guard.is_some() {
        // The user's Enter was not echoed
        let mut stdout = io::stdout();
        let _ = stdout.write_all(b"\n");
        let _ = stdout.flush();
    }
    drop(guard);
    line
}

/// Print `text` without a newline and flush
pub fn show(text: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()
}
