//! Per-engine runtime state handed to every extern call

use crate::{Err, RtError};
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;

#[derive(Clone, Default)]
enum Sink {
    #[default]
    Stdout,
    Captured(Arc<Mutex<String>>),
    Writer(Arc<Mutex<Box<dyn Write + Send>>>),
}

/// Output sink for the print builtins
///
/// A captured console buffers everything written to it; tests and embedders
/// read it back with [`Console::take`].
#[derive(Clone, Default)]
pub struct Console {
    sink: Sink,
}

impl Console {
    /// Console writing straight to the process stdout
    pub fn stdout() -> Self {
        Self { sink: Sink::Stdout }
    }

    /// Console buffering output in memory
    pub fn captured() -> Self {
        Self {
            sink: Sink::Captured(Arc::new(Mutex::new(String::new()))),
        }
    }

    /// Console writing to an arbitrary writer
    pub fn writer(out: impl Write + Send + 'static) -> Self {
        Self {
            sink: Sink::Writer(Arc::new(Mutex::new(Box::new(out)))),
        }
    }

    /// Write `text` and a newline. Write failures surface as `IOError`.
    pub fn write_line(&self, text: &str) -> Result<(), RtError> {
        let result = match &self.sink {
            Sink::Captured(buf) => {
                let mut buf = buf.lock();
                buf.push_str(text);
                buf.push('\n');
                Ok(())
            }
            Sink::Stdout => writeln!(std::io::stdout().lock(), "{}", text),
            Sink::Writer(out) => writeln!(out.lock(), "{}", text),
        };
        result.map_err(|e| {
            log::debug!("console write failed: {}", e);
            RtError::new(Err::IOError, format!("console write failed: {}", e))
        })
    }

    /// Drain captured output; always empty for other consoles
    pub fn take(&self) -> String {
        match &self.sink {
            Sink::Captured(buf) => std::mem::take(&mut *buf.lock()),
            _ => String::new(),
        }
    }
}

/// Mutable runtime state owned by one engine instance
#[derive(Default)]
pub struct RtContext {
    pub console: Console,
    files: FxHashMap<i64, BufReader<File>>,
    next_handle: i64,
}

impl RtContext {
    pub fn new(console: Console) -> Self {
        Self {
            console,
            files: FxHashMap::default(),
            next_handle: 1,
        }
    }

    /// Register an open file and return its handle
    pub fn add_file(&mut self, file: File) -> i64 {
        if self.next_handle == 0 {
            self.next_handle = 1;
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.files.insert(handle, BufReader::new(file));
        handle
    }

    /// Read one line (without its terminator) from an open file.
    /// `Ok(None)` signals end of file.
    pub fn read_line(&mut self, handle: i64) -> Option<std::io::Result<Option<String>>> {
        let reader = self.files.get_mut(&handle)?;
        let mut line = String::new();
        Some(match reader.read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Ok(Some(line))
            }
            Err(e) => Err(e),
        })
    }

    pub fn close_file(&mut self, handle: i64) -> bool {
        self.files.remove(&handle).is_some()
    }

    pub fn open_files(&self) -> usize {
        self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_captured_console() {
        let console = Console::captured();
        console.write_line("a").unwrap();
        console.write_line("b").unwrap();
        assert_eq!(console.take(), "a\nb\n");
        assert_eq!(console.take(), "");
    }

    #[test]
    fn test_console_clones_share_buffer() {
        let console = Console::captured();
        let ctx = RtContext::new(console.clone());
        ctx.console.write_line("hi").unwrap();
        assert_eq!(console.take(), "hi\n");
    }

    #[test]
    fn test_writer_console() {
        let console = Console::writer(Vec::new());
        assert_eq!(console.write_line("kept"), Ok(()));
        assert_eq!(console.take(), "");
    }

    #[test]
    fn test_failed_write_is_io_error() {
        let console = Console::writer(Closed);
        let err = console.write_line("lost").unwrap_err();
        assert_eq!(err.err, Err::IOError);
    }

    #[test]
    fn test_read_line_unknown_handle() {
        let mut ctx = RtContext::new(Console::captured());
        assert!(ctx.read_line(42).is_none());
    }
}
