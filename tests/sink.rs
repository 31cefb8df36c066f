use std::fs;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread;

use guardlock::{ContextId, Error, SafeSink};

#[test]
fn file_sink_appends_tagged_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    fs::write(&path, "existing\n").unwrap();

    let sink = SafeSink::open(&path).unwrap();
    sink.write("started");
    sink.write_error("failed to frobnicate");
    sink.close().unwrap();

    let ctx = ContextId::current();
    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text, format!("existing\n[{ctx}] started\n[ERROR][{ctx}] failed to frobnicate\n"));
}

#[test]
fn file_sink_serializes_threads() {
    const THREADS: usize = 4;
    const LINES: usize = 250;
    let file = tempfile::NamedTempFile::new().unwrap();
    let sink = Arc::new(SafeSink::open(file.path()).unwrap());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let sink = Arc::clone(&sink);
            thread::spawn(move || {
                for i in 0..LINES {
                    sink.write(format_args!("thread {t} line {i}"));
                }
                ContextId::current()
            })
        })
        .collect();
    let contexts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    drop(sink);

    let text = fs::read_to_string(file.path()).unwrap();
    assert_eq!(text.lines().count(), THREADS * LINES);
    for (t, ctx) in contexts.iter().enumerate() {
        let prefix = format!("[{ctx}] thread {t} line ");
        assert_eq!(text.lines().filter(|line| line.starts_with(&prefix)).count(), LINES);
    }
}

#[test]
fn unopenable_path_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be opened for appending.
    let error = SafeSink::open(dir.path()).unwrap_err();
    match &error {
        Error::ResourceUnavailable { path, .. } => assert_eq!(path, dir.path()),
        other => panic!("unexpected error: {other}"),
    }
    assert!(error.to_string().starts_with("resource `"));
}

#[test]
fn writes_after_close_are_counted() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let sink = SafeSink::open(file.path()).unwrap();
    sink.write("kept");
    assert!(sink.close().unwrap().is_some());
    sink.write("dropped");
    assert_eq!(sink.failed_writes(), 1);
    assert!(sink.is_closed());

    let text = fs::read_to_string(file.path()).unwrap();
    assert!(text.ends_with("] kept\n"));
}

/// A writer that appends into a buffer shared with the test.
struct Shared(Arc<Mutex<Vec<u8>>>);

impl Write for Shared {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn boxed_writers_are_shared_between_threads() {
    const THREADS: usize = 3;
    let file = tempfile::NamedTempFile::new().unwrap();
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writers: [Box<dyn Write + Send>; 2] =
        [Box::new(file.reopen().unwrap()), Box::new(Shared(Arc::clone(&buffer)))];

    for writer in writers {
        let sink = Arc::new(SafeSink::new(writer));
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || sink.write(format_args!("from {t}")))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sink.failed_writes(), 0);
        assert!(sink.close().unwrap().is_some());
    }

    let text = fs::read_to_string(file.path()).unwrap();
    assert_eq!(text.lines().count(), THREADS);
    let buffer = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert_eq!(buffer.lines().count(), THREADS);
}
