//! Correlated per-op diagnostic sinks.
//!
//! A connection carries up to two independent sinks: a debug sink that
//! records the life of each operation, and an error sink for handler
//! failures. Debug lines are prefixed with a fixed-width `Op 0x%08x`
//! correlator (the connection's logging op id, not the kernel unique) and
//! the `file:line` of the call site. A missing sink suppresses its
//! category.

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

pub struct OpLogger {
    out: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for OpLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpLogger").finish()
    }
}

impl OpLogger {
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(io::stderr()))
    }

    /// Writes one uncorrelated line. Write failures are swallowed: a broken
    /// log sink must not take down the connection.
    pub fn log(&self, args: fmt::Arguments<'_>) {
        #[allow(clippy::unwrap_used)] // poisoned only by a panicking writer
        let mut out = self.out.lock().unwrap();
        let _ = writeln!(out, "{}", args);
    }

    /// Writes one correlated line for the op with the given logging id.
    pub(crate) fn log_op(&self, op_id: u32, file: &str, line: u32, args: fmt::Arguments<'_>) {
        let base = file.rsplit('/').next().unwrap_or(file);
        let tag = format!("{}:{}", base, line);

        #[allow(clippy::unwrap_used)] // poisoned only by a panicking writer
        let mut out = self.out.lock().unwrap();
        let _ = writeln!(out, "Op 0x{:08x} {:>24}] {}", op_id, tag, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn correlated_line_format() {
        let buf = SharedBuf::default();
        let logger = OpLogger::new(Box::new(buf.clone()));

        logger.log_op(0x2a, "src/oplog.rs", 17, format_args!("<- Lookup"));

        let line = buf.contents();
        assert!(line.starts_with("Op 0x0000002a "), "line = {:?}", line);
        assert!(line.contains("oplog.rs:17]"), "line = {:?}", line);
        assert!(line.trim_end().ends_with("<- Lookup"), "line = {:?}", line);
    }

    #[test]
    fn uncorrelated_line_has_no_prefix() {
        let buf = SharedBuf::default();
        let logger = OpLogger::new(Box::new(buf.clone()));

        logger.log(format_args!("(Lookup) error: boom"));

        assert_eq!(buf.contents(), "(Lookup) error: boom\n");
    }
}
