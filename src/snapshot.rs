//! Request/response channel between the control thread and the audio callback.
//!
//! The control side ([`SnapshotClient`]) moves an empty buffer to the realtime
//! side ([`SnapshotResponder`]), which fills it from a [`SnapshotSource`] and
//! moves it back tagged with the same request id. Only one side can touch a
//! buffer at any time, so no locks are involved. The pending table lives
//! entirely on the control side; the realtime side only sees the channels.
//!
//! Each request settles exactly once: resolved with its buffer, or rejected
//! with a [`SnapshotError`]. Dropping the client rejects whatever is still
//! outstanding.

use crate::types::*;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use log::{debug, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Ways a snapshot request can fail. None of them are fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot channel destroyed")]
    Destroyed,

    #[error("snapshot transport disconnected")]
    Transport,

    #[error("too many snapshot requests in flight ({in_flight})")]
    Backpressure { in_flight: usize },

    #[error("{kind} needs a buffer of {expected} samples, got {actual}")]
    BufferLength {
        kind: SnapshotKind,
        expected: usize,
        actual: usize,
    },

    #[error("snapshot buffer is empty")]
    EmptyBuffer,

    #[error("request {request_id} came back malformed")]
    Malformed { request_id: u64 },

    #[error("timed out waiting for snapshot")]
    Timeout,
}

type Settlement = Result<Vec<f32>, SnapshotError>;

/// Whatever the realtime side copies snapshot data out of.
pub trait SnapshotSource {
    /// Per-key power, ascending note order.
    fn fill_power(&self, out: &mut [f32]);
    /// Most recent samples, oldest first.
    fn fill_waveform(&self, out: &mut [f32]);
}

/// Create a connected client/responder pair. `capacity` bounds both channels
/// and the number of requests the client will keep in flight.
pub fn channel(capacity: usize) -> (SnapshotClient, SnapshotResponder) {
    let capacity = capacity.max(1);
    let (request_tx, request_rx) = bounded(capacity);
    let (response_tx, response_rx) = bounded(capacity);
    (
        SnapshotClient {
            request_tx,
            response_rx,
            pending: HashMap::with_capacity(capacity),
            next_id: 1,
            capacity,
            closed: false,
        },
        SnapshotResponder {
            request_rx,
            response_tx,
            capacity,
            parked: Vec::with_capacity(capacity),
            served: 0,
            malformed_requests: 0,
            dropped_replies: 0,
        },
    )
}

// ─── Control side ───────────────────────────────────────────────────────────

struct PendingEntry {
    kind: SnapshotKind,
    settle_tx: Sender<Settlement>,
}

/// Handle for one outstanding request. Settles exactly once.
pub struct PendingSnapshot {
    request_id: u64,
    kind: SnapshotKind,
    settle_rx: Receiver<Settlement>,
    taken: bool,
}

impl PendingSnapshot {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn kind(&self) -> SnapshotKind {
        self.kind
    }

    /// The settled result, the first time it is available; `None` before
    /// that and on every call after it has been taken.
    pub fn try_take(&mut self) -> Option<Settlement> {
        if self.taken {
            return None;
        }
        let result = match self.settle_rx.try_recv() {
            Ok(r) => r,
            Err(TryRecvError::Empty) => return None,
            // The client always settles before dropping an entry.
            Err(TryRecvError::Disconnected) => Err(SnapshotError::Destroyed),
        };
        self.taken = true;
        Some(result)
    }
}

/// Control-thread end of the protocol: issues requests, matches replies.
///
/// Not shared between threads; every method takes `&mut self`.
pub struct SnapshotClient {
    request_tx: Sender<SnapshotRequest>,
    response_rx: Receiver<SnapshotResponse>,
    pending: HashMap<u64, PendingEntry>,
    next_id: u64,
    capacity: usize,
    closed: bool,
}

impl SnapshotClient {
    /// Hand `buffer` to the realtime side to be filled as `kind`.
    pub fn request(
        &mut self,
        kind: SnapshotKind,
        buffer: Vec<f32>,
    ) -> Result<PendingSnapshot, SnapshotError> {
        if self.closed {
            return Err(SnapshotError::Destroyed);
        }
        match kind {
            SnapshotKind::Power if buffer.len() != NOTE_COUNT => {
                warn!("Rejecting {} with {} slots", kind, buffer.len());
                return Err(SnapshotError::BufferLength {
                    kind,
                    expected: NOTE_COUNT,
                    actual: buffer.len(),
                });
            }
            SnapshotKind::Waveform if buffer.is_empty() => {
                warn!("Rejecting {} with empty buffer", kind);
                return Err(SnapshotError::EmptyBuffer);
            }
            _ => {}
        }
        if self.pending.len() >= self.capacity {
            return Err(SnapshotError::Backpressure {
                in_flight: self.pending.len(),
            });
        }

        let request_id = self.next_id;
        self.next_id += 1;

        let (settle_tx, settle_rx) = bounded(1);
        self.pending.insert(request_id, PendingEntry { kind, settle_tx });

        let request = SnapshotRequest {
            request_id,
            kind,
            buffer,
        };
        match self.request_tx.try_send(request) {
            Ok(()) => Ok(PendingSnapshot {
                request_id,
                kind,
                settle_rx,
                taken: false,
            }),
            Err(e) => {
                self.pending.remove(&request_id);
                warn!("Snapshot request {} not sent: {}", request_id, e);
                Err(match e {
                    TrySendError::Full(_) => SnapshotError::Backpressure {
                        in_flight: self.pending.len(),
                    },
                    TrySendError::Disconnected(_) => SnapshotError::Transport,
                })
            }
        }
    }

    /// Settle every reply that has already arrived. Returns how many
    /// requests were settled.
    pub fn dispatch(&mut self) -> usize {
        let mut settled = 0;
        loop {
            match self.response_rx.try_recv() {
                Ok(resp) => settled += self.settle(resp),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    settled += self.reject_all(SnapshotError::Transport);
                    break;
                }
            }
        }
        settled
    }

    /// Like [`dispatch`](Self::dispatch), but waits up to `timeout` for the
    /// first reply.
    pub fn dispatch_timeout(&mut self, timeout: Duration) -> usize {
        match self.response_rx.recv_timeout(timeout) {
            Ok(resp) => self.settle(resp) + self.dispatch(),
            Err(RecvTimeoutError::Timeout) => 0,
            Err(RecvTimeoutError::Disconnected) => self.reject_all(SnapshotError::Transport),
        }
    }

    /// Pump replies until `pending` settles or `timeout` passes. On timeout
    /// the request stays outstanding and may still settle later.
    pub fn wait(
        &mut self,
        pending: &mut PendingSnapshot,
        timeout: Duration,
    ) -> Result<Vec<f32>, SnapshotError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = pending.try_take() {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SnapshotError::Timeout);
            }
            self.dispatch_timeout(deadline - now);
        }
    }

    /// Requests sent and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Most requests that may be in flight at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `request` would pass the in-flight cap.
    pub fn has_room(&self) -> bool {
        self.pending.len() < self.capacity
    }

    pub fn is_pending(&self, request_id: u64) -> bool {
        self.pending.contains_key(&request_id)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Reject everything outstanding and refuse further requests.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let rejected = self.reject_all(SnapshotError::Destroyed);
        if rejected > 0 {
            debug!("Snapshot client shut down, rejected {} pending", rejected);
        }
    }

    fn settle(&mut self, resp: SnapshotResponse) -> usize {
        let Some(entry) = self.pending.remove(&resp.request_id) else {
            warn!(
                "Dropping {} reply for unknown request {}",
                resp.kind, resp.request_id
            );
            return 0;
        };

        let result = if entry.kind != resp.kind {
            warn!(
                "Request {} was {} but reply says {}",
                resp.request_id, entry.kind, resp.kind
            );
            Err(SnapshotError::Malformed {
                request_id: resp.request_id,
            })
        } else if resp.status == FillStatus::Malformed {
            warn!("Request {} ({}) came back unfilled", resp.request_id, resp.kind);
            Err(SnapshotError::Malformed {
                request_id: resp.request_id,
            })
        } else {
            Ok(resp.buffer)
        };
        // Receiver may already be gone if the caller stopped waiting.
        let _ = entry.settle_tx.try_send(result);
        1
    }

    fn reject_all(&mut self, error: SnapshotError) -> usize {
        let n = self.pending.len();
        for (_, entry) in self.pending.drain() {
            let _ = entry.settle_tx.try_send(Err(error.clone()));
        }
        n
    }
}

impl Drop for SnapshotClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─── Realtime side ──────────────────────────────────────────────────────────

/// Audio-callback end of the protocol.
///
/// `service` never blocks, logs, allocates or frees: both channels are
/// bounded (preallocated) and the client never has more requests in flight
/// than the reply channel holds. Replies that cannot be delivered because
/// the client is gone are parked, not dropped, and their buffers are freed
/// with the responder.
pub struct SnapshotResponder {
    request_rx: Receiver<SnapshotRequest>,
    response_tx: Sender<SnapshotResponse>,
    capacity: usize,
    /// Undeliverable buffers. Preallocated to `capacity`, which bounds the
    /// requests outstanding when the client disappears.
    parked: Vec<Vec<f32>>,
    served: u64,
    malformed_requests: u64,
    dropped_replies: u64,
}

impl SnapshotResponder {
    /// Fill and return every waiting request, at most `capacity` per call.
    pub fn service<S: SnapshotSource + ?Sized>(&mut self, source: &S) -> usize {
        let mut handled = 0;
        while handled < self.capacity {
            let Some(mut request) = self.try_next() else {
                break;
            };
            let status = fill(source, request.kind, &mut request.buffer);
            self.respond(request, status);
            handled += 1;
        }
        handled
    }

    /// Take the next waiting request without answering it.
    pub fn try_next(&self) -> Option<SnapshotRequest> {
        self.request_rx.try_recv().ok()
    }

    /// Send a request's buffer back. Returns false if the client is gone,
    /// in which case the buffer is parked.
    pub fn respond(&mut self, request: SnapshotRequest, status: FillStatus) -> bool {
        if status == FillStatus::Malformed {
            self.malformed_requests += 1;
        }
        let response = SnapshotResponse {
            request_id: request.request_id,
            kind: request.kind,
            buffer: request.buffer,
            status,
        };
        match self.response_tx.try_send(response) {
            Ok(()) => {
                self.served += 1;
                true
            }
            Err(e) => {
                self.dropped_replies += 1;
                if self.parked.len() < self.parked.capacity() {
                    self.parked.push(e.into_inner().buffer);
                }
                false
            }
        }
    }

    pub fn served(&self) -> u64 {
        self.served
    }

    pub fn malformed_requests(&self) -> u64 {
        self.malformed_requests
    }

    pub fn dropped_replies(&self) -> u64 {
        self.dropped_replies
    }

    /// Buffers held back from undeliverable replies.
    pub fn parked_buffers(&self) -> usize {
        self.parked.len()
    }
}

/// Copy snapshot data into `buffer`, or report it unusable for `kind`.
pub fn fill<S: SnapshotSource + ?Sized>(
    source: &S,
    kind: SnapshotKind,
    buffer: &mut [f32],
) -> FillStatus {
    match kind {
        SnapshotKind::Power if buffer.len() == NOTE_COUNT => {
            source.fill_power(buffer);
            FillStatus::Filled
        }
        SnapshotKind::Waveform if !buffer.is_empty() => {
            source.fill_waveform(buffer);
            FillStatus::Filled
        }
        _ => FillStatus::Malformed,
    }
}
