use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing_subscriber::fmt::writer::MakeWriter;

/// Tees formatted tracing output to stdout and, optionally, a log file.
#[derive(Clone)]
pub(crate) struct LogWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl LogWriter {
    pub(crate) fn new(path: Option<PathBuf>) -> io::Result<Self> {
        let file = match path {
            Some(path) => Some(Arc::new(Mutex::new(File::create(path)?))),
            None => None,
        };
        Ok(Self { file })
    }
}

pub(crate) struct LogWriterGuard {
    file: Option<Arc<Mutex<File>>>,
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriterGuard {
            file: self.file.clone(),
        }
    }
}

impl Write for LogWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        if let Some(file) = &self.file {
            file.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        if let Some(file) = &self.file {
            file.lock().unwrap_or_else(PoisonError::into_inner).flush()?;
        }
        Ok(())
    }
}

/// Keeps the opening events of a run plus a rolling tail, so a failing seed can be
/// explained without logging every transaction.
#[derive(Clone)]
pub(crate) struct EventLog {
    inner: Arc<Mutex<EventLogInner>>,
}

struct EventLogInner {
    first_limit: usize,
    tail_limit: usize,
    first: Vec<String>,
    tail: VecDeque<String>,
    dropped: u64,
}

impl EventLog {
    pub(crate) fn new(first_limit: usize, tail_limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventLogInner {
                first_limit,
                tail_limit,
                first: Vec::with_capacity(first_limit),
                tail: VecDeque::with_capacity(tail_limit),
                dropped: 0,
            })),
        }
    }

    pub(crate) fn push(&self, event: String) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.first.len() < inner.first_limit {
            inner.first.push(event);
            return;
        }
        if inner.tail_limit == 0 {
            inner.dropped += 1;
            return;
        }
        if inner.tail.len() == inner.tail_limit {
            inner.tail.pop_front();
            inner.dropped += 1;
        }
        inner.tail.push_back(event);
    }

    pub(crate) fn dump(&self) {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::info!("first {} event(s):", inner.first.len());
        for event in &inner.first {
            tracing::info!("  {event}");
        }
        if inner.dropped > 0 {
            tracing::info!("  ... {} event(s) elided ...", inner.dropped);
        }
        if !inner.tail.is_empty() {
            tracing::info!("last {} event(s):", inner.tail.len());
            for event in &inner.tail {
                tracing::info!("  {event}");
            }
        }
    }

    #[cfg(test)]
    fn snapshot(&self) -> (Vec<String>, Vec<String>, u64) {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        (
            inner.first.clone(),
            inner.tail.iter().cloned().collect(),
            inner.dropped,
        )
    }
}
