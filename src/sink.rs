use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};
use std::path::Path;

use crate::context::ContextId;
use crate::error::{Error, Result};
use crate::GuardedValue;

/// A line-oriented output shared between threads.
///
/// Every line is written and flushed inside one exclusive critical section,
/// so lines from different threads never interleave. Each line is tagged with
/// the [`ContextId`] of the writing thread:
///
/// ```text
/// [ctx-3] message
/// [ERROR][ctx-4] message
/// ```
///
/// The sink owns its writer, which never escapes. Any [`io::Write`]
/// implementation can back a sink: a [`File`] through [`open`], the console
/// through [`stdout`], or an in-memory buffer through [`new`].
///
/// A failed write does not reach the caller. It is counted, see
/// [`failed_writes`], and reported as a `tracing` error event. The writer is
/// flushed and released exactly once, by [`close`] or when the sink is dropped,
/// whichever comes first. Writes issued after that are rejected and counted
/// as failures.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use guardlock::SafeSink;
///
/// let sink = Arc::new(SafeSink::new(Vec::new()));
/// let c_sink = Arc::clone(&sink);
/// thread::spawn(move || c_sink.write("from a worker")).join().unwrap();
/// sink.write_error("from main");
///
/// let lines = sink.close().unwrap().unwrap();
/// let lines = String::from_utf8(lines).unwrap();
/// assert!(lines.lines().next().unwrap().ends_with("] from a worker"));
/// assert!(lines.lines().nth(1).unwrap().starts_with("[ERROR][ctx-"));
/// assert_eq!(sink.failed_writes(), 0);
/// ```
///
/// [`open`]: SafeSink::open
/// [`stdout`]: SafeSink::stdout
/// [`new`]: SafeSink::new
/// [`close`]: SafeSink::close
/// [`failed_writes`]: SafeSink::failed_writes
pub struct SafeSink<W: Write> {
    writer: GuardedValue<Option<W>>,
    failed: AtomicUsize,
}

impl SafeSink<File> {
    /// Opens the file at `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceUnavailable`] if the file cannot be opened.
    pub fn open<Q: AsRef<Path>>(path: Q) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().append(true).create(true).open(path).map_err(|source| {
            tracing::error!(path = %path.display(), error = %source, "failed to open sink");
            Error::ResourceUnavailable { path: path.to_path_buf(), source }
        })?;
        tracing::debug!(path = %path.display(), "opened file sink");
        Ok(Self::new(file))
    }
}

impl SafeSink<Stdout> {
    /// Creates a sink writing to the standard output of the process.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> SafeSink<W> {
    /// Creates a sink that takes ownership of `writer`.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer: GuardedValue::<_>::new(Some(writer)), failed: AtomicUsize::new(0) }
    }

    /// Appends `message` as one line, tagged with the calling context.
    pub fn write<M: fmt::Display>(&self, message: M) {
        let context = ContextId::current();
        self.append(context, format_args!("[{context}] {message}"));
    }

    /// Appends `message` as one error line, tagged with the calling context.
    pub fn write_error<M: fmt::Display>(&self, message: M) {
        let context = ContextId::current();
        self.append(context, format_args!("[ERROR][{context}] {message}"));
    }

    /// Returns the number of writes that did not reach the writer.
    pub fn failed_writes(&self) -> usize {
        self.failed.load(Relaxed)
    }

    /// Returns `true` if the writer has already been flushed and dropped.
    pub fn is_closed(&self) -> bool {
        self.writer.with_read(Option::is_none)
    }

    /// Flushes the writer and stops accepting writes.
    ///
    /// Waits for any write in progress on another thread to complete first.
    /// Returns the writer back on success, or `None` if this sink was already
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the final flush fails. The writer is dropped
    /// and the sink is closed regardless.
    pub fn close(&self) -> Result<Option<W>> {
        let Some(mut writer) = self.writer.with_write(Option::take) else {
            return Ok(None);
        };
        writer.flush()?;
        tracing::debug!(failed_writes = self.failed_writes(), "closed sink");
        Ok(Some(writer))
    }

    fn append(&self, context: ContextId, line: fmt::Arguments<'_>) {
        let line = format!("{line}\n");
        let result = self.writer.with_write(|writer| match writer {
            Some(writer) => writer.write_all(line.as_bytes()).and_then(|()| writer.flush()),
            None => Err(io::Error::new(io::ErrorKind::Other, "sink is closed")),
        });
        if let Err(error) = result {
            self.failed.fetch_add(1, Relaxed);
            tracing::error!(%context, %error, "sink write failed");
        }
    }
}

impl<W: Write> Drop for SafeSink<W> {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.with_mut(Option::take) {
            if let Err(error) = writer.flush() {
                tracing::error!(%error, "failed to flush sink on drop");
            }
        }
    }
}

impl<W: Write> fmt::Debug for SafeSink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeSink")
            .field("closed", &self.is_closed())
            .field("failed_writes", &self.failed_writes())
            .finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::SafeSink;
    use crate::context::ContextId;
    use crate::error::Error;

    /// A writer that records what reached it, and can be told to fail.
    #[derive(Clone, Default)]
    struct Recorder {
        bytes: Arc<Mutex<Vec<u8>>>,
        flushes: Arc<Mutex<usize>>,
        fail_writes: bool,
        fail_flush: bool,
    }

    impl Recorder {
        fn text(&self) -> String {
            String::from_utf8(self.bytes.lock().unwrap().clone()).unwrap()
        }

        fn flushes(&self) -> usize {
            *self.flushes.lock().unwrap()
        }
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.bytes.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            *self.flushes.lock().unwrap() += 1;
            if self.fail_flush {
                return Err(io::Error::new(io::ErrorKind::Other, "device gone"));
            }
            Ok(())
        }
    }

    #[test]
    fn lines_are_tagged_with_context() {
        let recorder = Recorder::default();
        let sink = SafeSink::new(recorder.clone());
        sink.write("hello");
        sink.write_error(42);
        let ctx = ContextId::current();
        assert_eq!(recorder.text(), format!("[{ctx}] hello\n[ERROR][{ctx}] 42\n"));
    }

    #[test]
    fn lines_never_interleave() {
        const THREADS: usize = 4;
        const LINES: usize = 200;
        let recorder = Recorder::default();
        let sink = Arc::new(SafeSink::new(recorder.clone()));
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || (0..LINES).for_each(|i| sink.write(format!("{t}:{i}"))))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let text = recorder.text();
        assert_eq!(text.lines().count(), THREADS * LINES);
        for line in text.lines() {
            let (tag, body) = line.split_once("] ").unwrap();
            assert!(tag.starts_with("[ctx-"));
            let (t, i) = body.split_once(':').unwrap();
            assert!(t.parse::<usize>().unwrap() < THREADS);
            assert!(i.parse::<usize>().unwrap() < LINES);
        }
    }

    #[test]
    fn failed_writes_are_counted() {
        let recorder = Recorder { fail_writes: true, ..Recorder::default() };
        let sink = SafeSink::new(recorder);
        sink.write("lost");
        sink.write("lost again");
        assert_eq!(sink.failed_writes(), 2);
        assert!(!sink.is_closed());
    }

    #[test]
    fn close_flushes_exactly_once() {
        let recorder = Recorder::default();
        let sink = SafeSink::new(recorder.clone());
        assert!(sink.close().unwrap().is_some());
        assert_eq!(recorder.flushes(), 1);
        assert!(sink.is_closed());
        assert!(sink.close().unwrap().is_none());
        drop(sink);
        assert_eq!(recorder.flushes(), 1);
    }

    #[test]
    fn writes_after_close_are_rejected() {
        let recorder = Recorder::default();
        let sink = SafeSink::new(recorder.clone());
        sink.close().unwrap();
        sink.write("too late");
        assert_eq!(sink.failed_writes(), 1);
        assert!(recorder.text().is_empty());
    }

    #[test]
    fn drop_flushes_open_writer() {
        let recorder = Recorder::default();
        drop(SafeSink::new(recorder.clone()));
        assert_eq!(recorder.flushes(), 1);
    }

    #[test]
    fn dropped_inside_another_critical_section() {
        let recorder = Recorder::default();
        let owner = crate::GuardedValue::<_>::new(Some(SafeSink::new(recorder.clone())));
        owner.with_write(|sink| *sink = None);
        assert_eq!(recorder.flushes(), 1);
    }

    #[test]
    fn close_reports_flush_failure() {
        let recorder = Recorder { fail_flush: true, ..Recorder::default() };
        let sink = SafeSink::new(recorder);
        assert!(matches!(sink.close(), Err(Error::Io(_))));
        assert!(sink.is_closed());
    }

    #[test]
    fn open_missing_directory_is_unavailable() {
        let dir = std::env::temp_dir().join("guardlock-missing-dir").join("nested");
        let path = dir.join("app.log");
        match SafeSink::open(&path) {
            Err(Error::ResourceUnavailable { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
