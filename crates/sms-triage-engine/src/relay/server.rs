//! TCP relay server.
//!
//! An accept thread hands connections to a fixed pool of worker threads over
//! a bounded channel. When the channel is full the connection is answered
//! with `ERROR|BUSY` and closed instead of queueing without limit.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use sms_triage_core::config::TriageConfig;
use sms_triage_core::error::{Error, Result};
use sms_triage_core::lock_order::{LockLevel, OrderedMutex};

use super::protocol::{ErrorCode, RELAY_HINT, RelayReply, RelayRequest};
use crate::pipeline::{IngestionPipeline, Outcome};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DRAIN_LIMIT: u64 = 64 * 1024;

/// Server tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayServerConfig {
    pub bind_addr: String,
    pub workers: usize,
    pub queue_depth: usize,
    pub io_timeout: Duration,
    pub max_line_bytes: usize,
}

impl From<&TriageConfig> for RelayServerConfig {
    fn from(config: &TriageConfig) -> Self {
        Self {
            bind_addr: config.relay_addr(),
            workers: config.relay_workers.max(1),
            queue_depth: config.relay_queue_depth.max(1),
            io_timeout: config.relay_timeout(),
            max_line_bytes: config.relay_max_line_bytes.max(16),
        }
    }
}

/// Counters, readable while the server runs.
#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    handled: AtomicU64,
    rejected_busy: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the server counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub accepted: u64,
    pub handled: u64,
    pub rejected_busy: u64,
    pub failed: u64,
}

/// A running relay server. Dropping it shuts it down.
pub struct RelayServer {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    accept_handle: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl RelayServer {
    /// Bind and start serving. Port `0` picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub fn start(config: &RelayServerConfig, pipeline: Arc<IngestionPipeline>) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).map_err(|e| {
            Error::Connection(format!("failed to bind relay on {}: {e}", config.bind_addr))
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = std::sync::mpsc::sync_channel::<TcpStream>(config.queue_depth.max(1));
        let rx = Arc::new(OrderedMutex::new(LockLevel::RelayServerJobs, rx));
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let mut worker_handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers.max(1) {
            let rx = Arc::clone(&rx);
            let pipeline = Arc::clone(&pipeline);
            let counters = Arc::clone(&counters);
            let io_timeout = config.io_timeout;
            let max_line_bytes = config.max_line_bytes;
            let handle = std::thread::Builder::new()
                .name(format!("relay-worker-{index}"))
                .spawn(move || {
                    worker_loop(&rx, &pipeline, &counters, io_timeout, max_line_bytes);
                })?;
            worker_handles.push(handle);
        }

        let accept_handle = {
            let stop = Arc::clone(&stop);
            let counters = Arc::clone(&counters);
            std::thread::Builder::new()
                .name("relay-accept".into())
                .spawn(move || accept_loop(&listener, &tx, &stop, &counters))?
        };

        tracing::info!(
            addr = %local_addr,
            workers = worker_handles.len(),
            queue_depth = config.queue_depth,
            "[relay] listening"
        );
        Ok(Self {
            local_addr,
            stop,
            counters,
            accept_handle: Some(accept_handle),
            worker_handles,
        })
    }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            handled: self.counters.handled.load(Ordering::Relaxed),
            rejected_busy: self.counters.rejected_busy.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Block until the flag from [`stop_handle`](Self::stop_handle) is set,
    /// then shut down.
    pub fn wait(mut self) {
        if let Some(handle) = self.accept_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("[relay] accept thread panicked");
        }
        self.shutdown();
    }

    /// Stop accepting, let workers finish queued connections, join all
    /// threads. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("[relay] accept thread panicked");
        }
        for handle in self.worker_handles.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("[relay] worker thread panicked");
            }
        }
        tracing::debug!(addr = %self.local_addr, "[relay] stopped");
    }

    /// Flag that stops the accept loop when set; for wiring into a signal
    /// handler or another thread while [`wait`](Self::wait) blocks.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: &TcpListener,
    tx: &SyncSender<TcpStream>,
    stop: &AtomicBool,
    counters: &Counters,
) {
    while !stop.load(Ordering::SeqCst) {
        let stream = match listener.accept() {
            Ok((stream, peer)) => {
                tracing::trace!(%peer, "[relay] accepted");
                stream
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
            Err(e) => {
                tracing::warn!("[relay] accept failed: {e}");
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
        };
        counters.accepted.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!("[relay] failed to configure connection: {e}");
            continue;
        }
        match tx.try_send(stream) {
            Ok(()) => {}
            Err(TrySendError::Full(mut stream)) => {
                counters.rejected_busy.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("[relay] queue full, rejecting connection");
                let _ = write_reply(&mut stream, &RelayReply::Error(ErrorCode::Busy));
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
    // Dropping `tx` here lets idle workers observe disconnection and exit.
}

fn worker_loop(
    rx: &OrderedMutex<Receiver<TcpStream>>,
    pipeline: &IngestionPipeline,
    counters: &Counters,
    io_timeout: Duration,
    max_line_bytes: usize,
) {
    loop {
        let job = rx.lock().recv();
        let Ok(stream) = job else {
            break;
        };
        match handle_connection(stream, pipeline, io_timeout, max_line_bytes) {
            Ok(()) => {
                counters.handled.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("[relay] connection failed: {e}");
            }
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    pipeline: &IngestionPipeline,
    io_timeout: Duration,
    max_line_bytes: usize,
) -> Result<()> {
    stream.set_read_timeout(Some(io_timeout))?;
    stream.set_write_timeout(Some(io_timeout))?;

    let reply = match read_request_line(&stream, max_line_bytes) {
        Ok(line) => match RelayRequest::decode(&line) {
            Ok(request) => dispatch(pipeline, &request),
            Err(e) => {
                tracing::debug!(line = %line, "[relay] rejected request");
                RelayReply::Error(e.into())
            }
        },
        Err(LineError::TooLong) => {
            write_reply(&mut stream, &RelayReply::Error(ErrorCode::TooLong))?;
            // Closing with unread input would reset the connection before the
            // peer sees the reply.
            let _ = stream.shutdown(Shutdown::Write);
            let _ = io::copy(&mut (&stream).take(DRAIN_LIMIT), &mut io::sink());
            return Ok(());
        }
        Err(LineError::NotUtf8) => RelayReply::Error(ErrorCode::Malformed),
        Err(LineError::Io(e)) => return Err(e.into()),
    };
    write_reply(&mut stream, &reply)?;
    Ok(())
}

enum LineError {
    TooLong,
    NotUtf8,
    Io(io::Error),
}

/// Read up to `max_line_bytes` bytes of one line (the newline excluded).
/// EOF before a newline ends the line.
fn read_request_line(
    stream: &TcpStream,
    max_line_bytes: usize,
) -> std::result::Result<String, LineError> {
    let limit = u64::try_from(max_line_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut reader = BufReader::new(stream.take(limit));
    let mut bytes = Vec::new();
    reader.read_until(b'\n', &mut bytes).map_err(LineError::Io)?;
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
    } else if bytes.len() > max_line_bytes {
        return Err(LineError::TooLong);
    }
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    String::from_utf8(bytes).map_err(|_| LineError::NotUtf8)
}

fn write_reply(stream: &mut TcpStream, reply: &RelayReply) -> io::Result<()> {
    let mut line = reply.encode();
    line.push('\n');
    stream.write_all(line.as_bytes())?;
    stream.flush()
}

/// Apply one request to the pipeline and its store.
#[must_use]
pub fn dispatch(pipeline: &IngestionPipeline, request: &RelayRequest) -> RelayReply {
    let command = request.command();
    let result = match request {
        RelayRequest::Ingest { origin, text } => pipeline
            .ingest(text, RELAY_HINT, origin)
            .map(|outcome| match outcome {
                Outcome::Stored(record) => RelayReply::ok_with(command, record.id.as_str()),
                Outcome::Dropped(reason) => RelayReply::Dropped {
                    command: command.to_string(),
                    reason: reason.code().to_string(),
                },
            }),
        RelayRequest::Delete(id) => pipeline
            .store()
            .delete(id)
            .map(|found| found_reply(command, found)),
        RelayRequest::MarkRead(id) => pipeline
            .store()
            .mark_read(id)
            .map(|found| found_reply(command, found)),
        RelayRequest::Shake => pipeline
            .store()
            .mark_all_read()
            .map(|changed| RelayReply::ok_with(command, changed.to_string())),
    };
    result.unwrap_or_else(|e| {
        tracing::warn!(command, error_type = e.error_type(), "[relay] request failed: {e}");
        RelayReply::Error(ErrorCode::Internal)
    })
}

fn found_reply(command: &str, found: bool) -> RelayReply {
    if found {
        RelayReply::ok(command)
    } else {
        RelayReply::NotFound {
            command: command.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::MessageParser;
    use sms_triage_core::models::RecordId;
    use sms_triage_store::{AllowList, Medium, MemoryMedium, RecordStore, StoreOptions};

    struct FailingMedium;

    impl Medium for FailingMedium {
        fn load(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        fn store(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
            Err(Error::Storage("disk full".into()))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Err(Error::Storage("disk full".into()))
        }
        fn update(&self, _key: &str, rewrite: &mut sms_triage_store::Rewrite<'_>) -> Result<()> {
            match rewrite(None)? {
                Some(_) => Err(Error::Storage("disk full".into())),
                None => Ok(()),
            }
        }
    }

    fn pipeline(medium: Arc<dyn Medium>) -> IngestionPipeline {
        let allow_list = Arc::new(AllowList::open(Arc::clone(&medium)));
        let store = Arc::new(RecordStore::open(medium, StoreOptions::default()));
        IngestionPipeline::new(MessageParser::default(), allow_list, store)
    }

    #[test]
    fn dispatch_maps_outcomes_to_replies() {
        let pipeline = pipeline(Arc::new(MemoryMedium::new()));
        let reply = dispatch(
            &pipeline,
            &RelayRequest::Ingest {
                origin: "1".into(),
                text: "[APP:A] HIGH: t | b".into(),
            },
        );
        let id = RecordId::from(reply.detail().unwrap());
        assert_eq!(pipeline.store().get(&id).unwrap().source_label, "A");
        assert_eq!(
            dispatch(&pipeline, &RelayRequest::MarkRead(RecordId::from("missing"))),
            RelayReply::NotFound {
                command: "MARK_READ".into()
            }
        );
    }

    #[test]
    fn dispatch_reports_storage_failure_as_internal() {
        let pipeline = pipeline(Arc::new(FailingMedium));
        let reply = dispatch(
            &pipeline,
            &RelayRequest::Ingest {
                origin: "1".into(),
                text: "hello".into(),
            },
        );
        assert_eq!(reply, RelayReply::Error(ErrorCode::Internal));
        assert!(pipeline.store().is_empty());
    }

    #[test]
    fn config_from_triage_config() {
        let config = RelayServerConfig::from(&TriageConfig::default());
        assert_eq!(config.bind_addr, "127.0.0.1:5555");
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_line_bytes, 1024);
    }
}
