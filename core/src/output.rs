use std::{io::Write, sync::Arc};

use parking_lot::Mutex;

/// Destination for help text and command output.
///
/// Defaults to stdout; tests swap in a buffer to assert on what was printed.
#[derive(Clone, Default)]
pub struct Output {
    buffer: Option<Arc<Mutex<Vec<u8>>>>,
}

impl Output {
    pub fn stdout() -> Self {
        Self { buffer: None }
    }

    pub fn buffer() -> Self {
        Self {
            buffer: Some(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    /// Write `text` followed by a newline unless it already ends with one.
    pub fn write_line(&self, text: &str) {
        let newline = if text.ends_with('\n') { "" } else { "\n" };
        match &self.buffer {
            Some(buf) => {
                let mut buf = buf.lock();
                buf.extend_from_slice(text.as_bytes());
                buf.extend_from_slice(newline.as_bytes());
            }
            None => {
                let mut out = std::io::stdout().lock();
                let _ = write!(out, "{text}{newline}");
                let _ = out.flush();
            }
        }
    }

    /// Everything written so far. Always empty for stdout.
    pub fn contents(&self) -> String {
        self.buffer
            .as_ref()
            .map(|buf| String::from_utf8_lossy(&buf.lock()).into_owned())
            .unwrap_or_default()
    }
}
