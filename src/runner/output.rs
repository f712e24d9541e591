//! Child output capture.
//!
//! In captured mode every stdout/stderr line is:
//! - appended to an in-memory ring buffer (oldest lines evicted),
//! - broadcast to subscribers as an [`OutputEvent`],
//! - re-emitted as a `tracing` event with target `devsup::child`.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const DEFAULT_MAX_OUTPUT_LINES: usize = 10_000;

const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// Share of the ring buffer at which a one-time warning is logged.
const BUFFER_WARNING_THRESHOLD: f64 = 0.8;

/// How long reader tasks get to drain a dead child's pipes.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputEvent {
    pub stream: OutputStream,
    pub line: String,
}

struct Buffer {
    lines: Mutex<VecDeque<String>>,
    max_lines: usize,
    warned_at_capacity: AtomicBool,
    dropped_count: AtomicUsize,
}

impl Buffer {
    fn push(&self, service_name: &str, line: String) {
        let mut lines = self.lines.lock();
        lines.push_back(line);
        if lines.len() > self.max_lines {
            lines.pop_front();
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
        }

        let threshold = (self.max_lines as f64 * BUFFER_WARNING_THRESHOLD) as usize;
        if lines.len() >= threshold && !self.warned_at_capacity.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "Output buffer for '{}' is at {}/{} lines. Oldest lines will be dropped.",
                service_name,
                lines.len(),
                self.max_lines
            );
        }
    }
}

/// Captures stdout/stderr of successive child processes.
pub struct OutputCapture {
    service_name: Arc<str>,
    buffer: Arc<Buffer>,
    sender: broadcast::Sender<OutputEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OutputCapture {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self::with_max_lines(service_name, DEFAULT_MAX_OUTPUT_LINES)
    }

    pub fn with_max_lines(service_name: impl Into<String>, max_lines: usize) -> Self {
        let (sender, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        Self {
            service_name: Arc::from(service_name.into()),
            buffer: Arc::new(Buffer {
                lines: Mutex::new(VecDeque::new()),
                max_lines: max_lines.max(1),
                warned_at_capacity: AtomicBool::new(false),
                dropped_count: AtomicUsize::new(0),
            }),
            sender,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start reading one of the child's streams until EOF.
    pub fn attach<R>(&self, reader: R, stream: OutputStream)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::clone(&self.buffer);
        let sender = self.sender.clone();
        let service_name = Arc::clone(&self.service_name);

        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = decode_line(&raw);
                        tracing::info!(
                            target: "devsup::child",
                            service = %service_name,
                            %stream,
                            "{}",
                            line
                        );
                        let buffered = match stream {
                            OutputStream::Stdout => line.clone(),
                            OutputStream::Stderr => format!("[stderr] {}", line),
                        };
                        buffer.push(&service_name, buffered);
                        // No subscribers is fine
                        let _ = sender.send(OutputEvent { stream, line });
                    }
                    Err(e) => {
                        // Keep the pipe open so the child never sees EPIPE
                        tracing::warn!(
                            "Read error on {} of '{}', discarding the rest: {}",
                            stream,
                            service_name,
                            e
                        );
                        let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                        break;
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Let reader tasks finish draining, then abort any that remain.
    pub async fn detach(&self) {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.sender.subscribe()
    }

    /// The last `n` buffered lines, oldest first.
    pub fn recent(&self, n: usize) -> Vec<String> {
        let lines = self.buffer.lines.lock();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn dropped_count(&self) -> usize {
        self.buffer.dropped_count.load(Ordering::Relaxed)
    }
}

/// One raw line without its terminator. Invalid UTF-8 is replaced, not fatal.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if raw[..end].ends_with(b"\n") {
        end -= 1;
    }
    if raw[..end].ends_with(b"\r") {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(capture: &OutputCapture) {
        // Readers over in-memory slices hit EOF right away
        capture.detach().await;
    }

    #[tokio::test]
    async fn captures_lines_in_order() {
        let capture = OutputCapture::new("svc");
        capture.attach(&b"one\ntwo\nthree\n"[..], OutputStream::Stdout);
        drain(&capture).await;

        assert_eq!(capture.recent(2), vec!["two", "three"]);
        assert_eq!(capture.recent(10).len(), 3);
    }

    #[tokio::test]
    async fn stderr_lines_are_tagged() {
        let capture = OutputCapture::new("svc");
        capture.attach(&b"boom\n"[..], OutputStream::Stderr);
        drain(&capture).await;
        assert_eq!(capture.recent(1), vec!["[stderr] boom"]);
    }

    #[tokio::test]
    async fn ring_buffer_evicts_oldest() {
        let capture = OutputCapture::with_max_lines("svc", 2);
        capture.attach(&b"a\nb\nc\n"[..], OutputStream::Stdout);
        drain(&capture).await;
        assert_eq!(capture.recent(5), vec!["b", "c"]);
        assert_eq!(capture.dropped_count(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let capture = OutputCapture::new("svc");
        let mut rx = capture.subscribe();
        capture.attach(&b"ready\n"[..], OutputStream::Stdout);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            OutputEvent {
                stream: OutputStream::Stdout,
                line: "ready".to_string()
            }
        );
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_stop_the_reader() {
        let capture = OutputCapture::new("svc");
        capture.attach(&b"before\n\xff\xfe\nafter\r\n"[..], OutputStream::Stdout);
        drain(&capture).await;
        assert_eq!(
            capture.recent(3),
            vec!["before", "\u{FFFD}\u{FFFD}", "after"]
        );
    }

    #[test]
    fn decode_line_strips_terminators() {
        assert_eq!(decode_line(b"plain"), "plain");
        assert_eq!(decode_line(b"unix\n"), "unix");
        assert_eq!(decode_line(b"dos\r\n"), "dos");
        assert_eq!(decode_line(b"\n"), "");
    }
}
