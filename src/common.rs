// Licensed under the Apache-2.0 license

//! Logging shared by the I2C engine and its foreground wrapper.
//!
//! Loggers are injected as a generic parameter so that a build without a
//! console pays nothing for the log statements (`NoOpLogger`). Everything
//! that logs can run in interrupt context, so implementations must not block
//! for long and must never fail.

use core::fmt;

/// Sink for diagnostic messages.
pub trait Logger {
    fn debug(&mut self, args: fmt::Arguments<'_>);
    fn warn(&mut self, args: fmt::Arguments<'_>);
    fn error(&mut self, args: fmt::Arguments<'_>);
}

/// Logger that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn debug(&mut self, _args: fmt::Arguments<'_>) {}
    fn warn(&mut self, _args: fmt::Arguments<'_>) {}
    fn error(&mut self, _args: fmt::Arguments<'_>) {}
}

/// Logger writing one `[LEVEL] message` line per call to a byte sink,
/// typically a UART.
///
/// Write errors are dropped; a broken console must not affect the bus.
pub struct UartLogger<W: embedded_io::Write> {
    writer: W,
}

impl<W: embedded_io::Write> UartLogger<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Give the underlying writer back.
    pub fn release(self) -> W {
        self.writer
    }

    fn line(&mut self, level: &str, args: fmt::Arguments<'_>) {
        let _ = self.writer.write_fmt(format_args!("[{level}] {args}\r\n"));
    }
}

impl<W: embedded_io::Write> Logger for UartLogger<W> {
    fn debug(&mut self, args: fmt::Arguments<'_>) {
        self.line("DEBUG", args);
    }

    fn warn(&mut self, args: fmt::Arguments<'_>) {
        self.line("WARN", args);
    }

    fn error(&mut self, args: fmt::Arguments<'_>) {
        self.line("ERROR", args);
    }
}
