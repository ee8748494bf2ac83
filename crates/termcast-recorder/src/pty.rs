//! PTY-backed terminal session using portable-pty.

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use termcast_core::{Dimensions, Error, Result};

use crate::terminal::{TerminalEvent, TerminalSession};

const READ_BUFFER_SIZE: usize = 8192;

/// Options for spawning a command in a PTY.
#[derive(Debug, Clone)]
pub struct PtyOptions {
    /// Command to execute
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Initial terminal dimensions
    pub dimensions: Dimensions,
    /// TERM value for the child
    pub term: String,
    /// Working directory
    pub cwd: Option<String>,
}

/// A command running in a pseudo-terminal.
///
/// A background thread reads the PTY, forwarding decoded output as
/// [`TerminalEvent::Output`], then reports the exit code once the child is
/// done writing.
pub struct PtyTerminal {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    dimensions: Mutex<Dimensions>,
    events_tx: mpsc::UnboundedSender<TerminalEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TerminalEvent>>>,
}

impl std::fmt::Debug for PtyTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyTerminal")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn pty_size(dimensions: Dimensions) -> PtySize {
    PtySize {
        rows: dimensions.rows,
        cols: dimensions.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl PtyTerminal {
    /// Spawn `options.command` in a new PTY.
    pub fn spawn(options: PtyOptions) -> Result<Self> {
        info!(
            "Spawning PTY: command='{}' args={:?}, dimensions={}, cwd={:?}",
            options.command, options.args, options.dimensions, options.cwd
        );

        let pair = native_pty_system()
            .openpty(pty_size(options.dimensions))
            .map_err(|e| {
                error!("Failed to open PTY: {}", e);
                Error::Pty(format!("Failed to open PTY: {e}"))
            })?;

        let mut cmd = CommandBuilder::new(&options.command);
        cmd.args(&options.args);
        cmd.env("TERM", &options.term);
        if let Some(dir) = &options.cwd {
            cmd.cwd(dir);
        }

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", options.command, e);
            Error::Pty(format!("Failed to spawn command: {e}"))
        })?;
        // The reader only sees EOF once every slave handle is closed.
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Pty(format!("Failed to take writer: {e}")))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Pty(format!("Failed to clone reader: {e}")))?;
        let killer = child.clone_killer();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let thread_tx = events_tx.clone();
        std::thread::Builder::new()
            .name("termcast-pty-reader".to_string())
            .spawn(move || {
                let mut decoder = Utf8Decoder::default();
                let mut buf = [0u8; READ_BUFFER_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            let text = decoder.decode(&buf[..n]);
                            if !text.is_empty() && thread_tx.send(TerminalEvent::Output(text)).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            // EIO is how Linux reports a closed slave.
                            debug!("PTY read ended: {}", e);
                            break;
                        }
                    }
                }
                let tail = decoder.finish();
                if !tail.is_empty() {
                    let _ = thread_tx.send(TerminalEvent::Output(tail));
                }

                let code = match child.wait() {
                    Ok(status) => Some(status.exit_code() as i32),
                    Err(e) => {
                        warn!("Failed to wait for child: {}", e);
                        None
                    }
                };
                debug!(exit_code = ?code, "PTY child exited");
                let _ = thread_tx.send(TerminalEvent::Exit(code));
            })
            .map_err(|e| Error::Pty(format!("Failed to start reader thread: {e}")))?;

        info!("PTY spawned successfully: command='{}'", options.command);

        Ok(Self {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
            dimensions: Mutex::new(options.dimensions),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }
}

impl TerminalSession for PtyTerminal {
    fn write(&self, data: &[u8]) -> Result<()> {
        let mut writer = lock(&self.writer);
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn dimensions(&self) -> Dimensions {
        *lock(&self.dimensions)
    }

    fn resize(&self, dimensions: Dimensions) -> Result<()> {
        if !dimensions.is_valid() {
            return Err(Error::InvalidInput(format!(
                "Invalid dimensions: {dimensions}"
            )));
        }
        lock(&self.master)
            .resize(pty_size(dimensions))
            .map_err(|e| Error::Pty(format!("Failed to resize PTY: {e}")))?;
        *lock(&self.dimensions) = dimensions;
        let _ = self.events_tx.send(TerminalEvent::Resize(dimensions));
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TerminalEvent>> {
        lock(&self.events_rx).take()
    }

    fn dispose(&self) {
        if let Err(e) = lock(&self.killer).kill() {
            debug!("Kill on dispose failed (child likely gone): {}", e);
        }
    }
}

/// Decodes a byte stream as UTF-8, holding back a sequence split across reads.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        let mut rest = self.pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // An incomplete trailing sequence: wait for the rest.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        text
    }

    /// Whatever is still held back, decoded lossily.
    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_passes_ascii() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"hello"), "hello");
    }

    #[test]
    fn test_decoder_joins_split_sequence() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "é!".as_bytes();
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.decode(&bytes[1..]), "é!");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }

    #[test]
    fn test_decoder_holds_split_sequence_after_invalid_byte() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'a', 0xff, 0xc3]), "a\u{fffd}");
        assert_eq!(decoder.decode(&[0xa9]), "é");
    }

    #[test]
    fn test_decoder_finish_flushes_held_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'x', 0xe2, 0x82]), "x");
        assert_eq!(decoder.finish(), "\u{fffd}");
        assert_eq!(decoder.finish(), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pty_reports_output_and_exit_code() {
        let pty = PtyTerminal::spawn(PtyOptions {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "printf hi; exit 3".to_string()],
            dimensions: Dimensions::new(24, 80),
            term: "xterm-256color".to_string(),
            cwd: None,
        })
        .unwrap();
        let mut events = pty.take_events().unwrap();
        assert!(pty.take_events().is_none());

        let mut output = String::new();
        let exit = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            while let Some(event) = events.recv().await {
                match event {
                    TerminalEvent::Output(text) => output.push_str(&text),
                    TerminalEvent::Exit(code) => return code,
                    TerminalEvent::Resize(_) => {}
                }
            }
            None
        })
        .await
        .unwrap();

        assert!(output.contains("hi"));
        assert_eq!(exit, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pty_resize_emits_event() {
        let pty = PtyTerminal::spawn(PtyOptions {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 1".to_string()],
            dimensions: Dimensions::new(24, 80),
            term: "xterm-256color".to_string(),
            cwd: None,
        })
        .unwrap();
        let mut events = pty.take_events().unwrap();

        pty.resize(Dimensions::new(30, 100)).unwrap();
        assert_eq!(pty.dimensions(), Dimensions::new(30, 100));
        assert!(pty.resize(Dimensions::new(0, 100)).is_err());

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Some(TerminalEvent::Resize(dims)) => return Some(dims),
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, Some(Dimensions::new(30, 100)));
        pty.dispose();
    }
}
