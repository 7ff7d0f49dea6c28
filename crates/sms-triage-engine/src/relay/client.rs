//! Relay client and the background outbox built on it.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::thread::JoinHandle;
use std::time::Duration;

use sms_triage_core::config::TriageConfig;
use sms_triage_core::error::{Error, Result};
use sms_triage_core::lock_order::{LockLevel, OrderedMutex};

use super::protocol::{RelayReply, RelayRequest};

/// Connects to a relay server, one connection per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayClient {
    addr: String,
    timeout: Duration,
}

impl From<&TriageConfig> for RelayClient {
    fn from(config: &TriageConfig) -> Self {
        Self::new(config.relay_addr(), config.relay_timeout())
    }
}

impl RelayClient {
    #[must_use]
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one request and wait for its reply.
    pub fn send(&self, request: &RelayRequest) -> Result<RelayReply> {
        self.send_line(&request.encode())
    }

    /// Send a pre-encoded request line (no trailing newline needed).
    pub fn send_line(&self, line: &str) -> Result<RelayReply> {
        let mut stream = self.connect()?;
        let mut payload = line.trim_end_matches(['\n', '\r']).to_string();
        payload.push('\n');
        stream
            .write_all(payload.as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|e| self.io_error(&e))?;

        let mut reply = String::new();
        BufReader::new(&stream)
            .read_line(&mut reply)
            .map_err(|e| self.io_error(&e))?;
        if reply.is_empty() {
            return Err(Error::Protocol(format!(
                "relay at {} closed the connection without replying",
                self.addr
            )));
        }
        RelayReply::decode(&reply)
    }

    fn connect(&self) -> Result<TcpStream> {
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|e| Error::Connection(format!("cannot resolve {}: {e}", self.addr)))?
            .collect();
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.map_or_else(
            || Error::Connection(format!("{} resolved to no addresses", self.addr)),
            |e| self.io_error(&e),
        ))
    }

    fn io_error(&self, err: &io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout(format!(
                "relay at {} did not respond within {:?}",
                self.addr, self.timeout
            )),
            _ => Error::Connection(format!("relay at {}: {err}", self.addr)),
        }
    }
}

// =============================================================================
// Outbox
// =============================================================================

struct OutboxJob {
    request: RelayRequest,
    done: SyncSender<Result<RelayReply>>,
}

/// Handle to a submitted request's eventual reply.
#[derive(Debug)]
pub struct Completion {
    rx: Receiver<Result<RelayReply>>,
}

impl Completion {
    /// Block until the request finishes.
    pub fn wait(self) -> Result<RelayReply> {
        self.rx.recv().unwrap_or_else(|_| Err(worker_gone()))
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<RelayReply> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(format!(
                "relay request still pending after {timeout:?}"
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(worker_gone()),
        }
    }

    /// `None` while the request is still pending.
    pub fn try_wait(&self) -> Option<Result<RelayReply>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(worker_gone())),
        }
    }
}

fn worker_gone() -> Error {
    Error::Internal("relay outbox worker exited before replying".to_string())
}

/// Bounded queue of outgoing relay requests drained by worker threads.
pub struct RelayOutbox {
    tx: Option<SyncSender<OutboxJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl RelayOutbox {
    /// Spawn `workers` threads sharing a queue of `depth` slots.
    pub fn start(client: RelayClient, workers: usize, depth: usize) -> Result<Self> {
        let (tx, rx) = std::sync::mpsc::sync_channel::<OutboxJob>(depth.max(1));
        let rx = Arc::new(OrderedMutex::new(LockLevel::RelayOutboxJobs, rx));
        let client = Arc::new(client);
        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let client = Arc::clone(&client);
            let handle = std::thread::Builder::new()
                .name(format!("relay-outbox-{index}"))
                .spawn(move || outbox_loop(&rx, &client))?;
            handles.push(handle);
        }
        Ok(Self {
            tx: Some(tx),
            workers: handles,
        })
    }

    /// Queue `request`. Fails with [`Error::ResourceBusy`] when every slot is
    /// taken.
    pub fn submit(&self, request: RelayRequest) -> Result<Completion> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::Internal("relay outbox is shut down".to_string()))?;
        let (done, rx) = std::sync::mpsc::sync_channel(1);
        match tx.try_send(OutboxJob { request, done }) {
            Ok(()) => Ok(Completion { rx }),
            Err(TrySendError::Full(job)) => Err(Error::ResourceBusy(format!(
                "relay outbox full, {} not queued",
                job.request.command()
            ))),
            Err(TrySendError::Disconnected(_)) => Err(worker_gone()),
        }
    }

    /// Finish queued requests, then join the workers.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("[relay] outbox worker panicked");
            }
        }
    }
}

impl Drop for RelayOutbox {
    fn drop(&mut self) {
        self.stop();
    }
}

fn outbox_loop(rx: &OrderedMutex<Receiver<OutboxJob>>, client: &RelayClient) {
    loop {
        let job = rx.lock().recv();
        let Ok(OutboxJob { request, done }) = job else {
            break;
        };
        let result = client.send(&request);
        if let Err(e) = &result {
            tracing::debug!(command = request.command(), "[relay] outbox send failed: {e}");
        }
        // The submitter may have dropped its Completion.
        let _ = done.send(result);
    }
}
