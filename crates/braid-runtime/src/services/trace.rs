//! Optional event tracing to a file.

use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One trace line.
#[derive(Debug)]
pub struct TraceRecord {
    /// `[instance.flow.component]` of the reporting worker.
    pub location: String,
    /// Record kind, e.g. `event_received`.
    pub kind: String,
    /// Free-form body.
    pub body: String,
}

/// Handle for appending trace records; writing happens on a dedicated
/// task so workers never block on file I/O.
#[derive(Clone)]
pub struct TraceSink {
    tx: mpsc::UnboundedSender<TraceRecord>,
}

impl TraceSink {
    /// Opens (appends to) the trace file and spawns the writer task.
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the file cannot be opened.
    pub fn to_file(path: &Path, stop: CancellationToken) -> std::io::Result<Self> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (tx, mut rx) = mpsc::unbounded_channel::<TraceRecord>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    record = rx.recv() => {
                        let Some(record) = record else { break };
                        let line = format!(
                            "{} | {} | {} | {}\n",
                            chrono::Local::now().to_rfc3339(),
                            record.location,
                            record.kind,
                            record.body,
                        );
                        if file.write_all(line.as_bytes()).and_then(|()| file.flush()).is_err() {
                            warn!("trace file write failed, stopping trace");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self { tx })
    }

    /// Appends one record; silently dropped after shutdown.
    pub fn record(
        &self,
        location: impl Into<String>,
        kind: impl Into<String>,
        body: impl Into<String>,
    ) {
        let _ = self.tx.send(TraceRecord {
            location: location.into(),
            kind: kind.into(),
            body: body.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_appended_to_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trace.log");
        let stop = CancellationToken::new();

        let sink = TraceSink::to_file(&path, stop.clone()).expect("open");
        sink.record("[t.f.c]", "event_received", "MESSAGE");

        // The writer task owns the file; give it a beat.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(contents.contains("event_received"));
        assert!(contents.contains("[t.f.c]"));
        stop.cancel();
    }
}
