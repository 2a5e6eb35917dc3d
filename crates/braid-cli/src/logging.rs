//! Tracing setup: a stdout layer and a file layer with independent
//! levels, driven by the `log:` configuration section.

use anyhow::{Context, Result};
use braid_runtime::config::LogConfig;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Write};
use std::sync::Arc;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber from the `log:` section.
///
/// # Errors
///
/// Returns an error when the log file cannot be opened or a level
/// string does not parse.
pub fn init(config: &LogConfig) -> Result<()> {
    let stdout_filter = parse_level(&config.stdout_log_level)?;
    let file_filter = parse_level(&config.log_file_level)?;

    let file = File::options()
        .create(true)
        .append(true)
        .open(&config.log_file)
        .with_context(|| format!("failed to open log file '{}'", config.log_file))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(stdout_filter))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(FileMakeWriter::new(file))
                .with_filter(file_filter),
        )
        .try_init()
        .context("tracing subscriber already initialized")?;
    Ok(())
}

fn parse_level(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level.to_ascii_lowercase())
        .with_context(|| format!("invalid log level '{level}'"))
}

/// `MakeWriter` appending each formatted event to the log file.
///
/// Events are buffered per write and flushed on drop, so interleaved
/// workers produce whole lines.
#[derive(Clone)]
struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

impl FileMakeWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl<'a> fmt::MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriter {
            file: Arc::clone(&self.file),
            buf: Vec::with_capacity(256),
        }
    }
}

struct FileWriter {
    file: Arc<Mutex<File>>,
    buf: Vec<u8>,
}

impl Write for FileWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let mut file = self.file.lock();
        let _ = file.write_all(&self.buf);
        let _ = file.flush();
    }
}
