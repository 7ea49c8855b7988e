//! Callback to future bridge.
//!
//! Every single-shot platform request is registered in a [`PendingTable`]
//! under a fresh [`RequestId`] and handed to the platform as a
//! [`Completion`]. The caller awaits a oneshot receiver for the entry.
//!
//! Settling removes the entry, so whichever of the following happens first
//! wins and the rest find nothing:
//! - the platform resolves the completion
//! - the platform drops the completion unresolved
//! - the caller drops its future (the entry is detached)
//! - teardown aborts every entry
//!
//! Once the bridge is closed, new requests fail with `Disconnected` before
//! the platform sees them. Nothing here ever re-issues or cancels the platform operation itself.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;

use crate::errors::{IapError, IapResult, Operation};
use crate::platform::{NativeError, NativeOutcome};

/// Opaque key for a pending request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

enum Settlement {
    /// A `NativeOutcome<T>` for the `T` the entry was registered with.
    Resolved(Box<dyn Any + Send>),
    Aborted(IapError),
}

struct PendingEntry {
    operation: Operation,
    tx: oneshot::Sender<Settlement>,
}

#[derive(Default)]
struct Entries {
    pending: HashMap<RequestId, PendingEntry>,
    closed: bool,
}

#[derive(Default)]
struct PendingTable {
    next_id: AtomicU64,
    entries: Mutex<Entries>,
}

impl PendingTable {
    fn register(
        &self,
        operation: Operation,
    ) -> IapResult<(RequestId, oneshot::Receiver<Settlement>)> {
        let mut entries = self.entries.lock().expect("lock poisoned");
        if entries.closed {
            return Err(IapError::Disconnected { operation });
        }
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        entries.pending.insert(id, PendingEntry { operation, tx });
        Ok((id, rx))
    }

    /// Deliver a settlement. Returns false if nobody is waiting any more.
    fn settle(&self, id: RequestId, settlement: Settlement) -> bool {
        let entry = self.entries.lock().expect("lock poisoned").pending.remove(&id);
        match entry {
            Some(entry) => entry.tx.send(settlement).is_ok(),
            None => {
                tracing::trace!(request = %id, "discarding late callback");
                false
            }
        }
    }

    fn detach(&self, id: RequestId) {
        if let Some(entry) = self.entries.lock().expect("lock poisoned").pending.remove(&id) {
            tracing::trace!(request = %id, operation = %entry.operation, "caller stopped waiting");
        }
    }

    fn abort_all(&self, close: bool) -> usize {
        let drained: Vec<_> = {
            let mut entries = self.entries.lock().expect("lock poisoned");
            entries.closed |= close;
            entries.pending.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Settlement::Aborted(IapError::Disconnected {
                operation: entry.operation,
            }));
        }
        count
    }

    fn len(&self) -> usize {
        self.entries.lock().expect("lock poisoned").pending.len()
    }
}

/// Removes the entry if the awaiting future is dropped early.
struct DetachGuard<'a> {
    table: &'a PendingTable,
    id: RequestId,
}

impl Drop for DetachGuard<'_> {
    fn drop(&mut self) {
        self.table.detach(self.id);
    }
}

/// Turns platform callbacks into awaitable outcomes.
#[derive(Clone, Default)]
pub struct Bridge {
    table: Arc<PendingTable>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request, hand its completion to `start`, and wait for the
    /// platform's answer.
    ///
    /// The outer `Result` is the coordinator's own failure (teardown, a
    /// dropped completion); the inner one is what the platform reported.
    /// `start` runs synchronously and may resolve the completion before
    /// returning.
    pub async fn call<T, F>(&self, operation: Operation, start: F) -> IapResult<NativeOutcome<T>>
    where
        T: Send + 'static,
        F: FnOnce(Completion<T>),
    {
        let (id, rx) = self.table.register(operation)?;
        let _guard = DetachGuard {
            table: &self.table,
            id,
        };

        start(Completion {
            table: Arc::downgrade(&self.table),
            id,
            operation,
            settled: false,
            _outcome: PhantomData,
        });

        match rx.await {
            Ok(Settlement::Resolved(payload)) => payload
                .downcast::<NativeOutcome<T>>()
                .map(|outcome| *outcome)
                .map_err(|_| IapError::Platform {
                    operation,
                    message: "completion resolved with an unexpected payload".to_string(),
                    code: None,
                }),
            Ok(Settlement::Aborted(error)) => Err(error),
            Err(_) => Err(IapError::Disconnected { operation }),
        }
    }

    /// Fail every pending request with `Disconnected`. Returns how many were
    /// pending.
    pub fn abort_all(&self) -> usize {
        self.table.abort_all(false)
    }

    /// Abort everything pending and refuse new requests for good.
    ///
    /// A request racing with `close` either is registered first and aborted,
    /// or is refused; it never waits on a closed bridge.
    pub fn close(&self) -> usize {
        self.table.abort_all(true)
    }

    /// Number of requests still waiting for the platform.
    pub fn pending(&self) -> usize {
        self.table.len()
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Single-use callback handed to the platform for one request.
///
/// May be resolved from any thread. Dropping it unresolved fails the request.
#[must_use = "a completion must be resolved or the request fails"]
pub struct Completion<T> {
    table: Weak<PendingTable>,
    id: RequestId,
    operation: Operation,
    settled: bool,
    _outcome: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Completion<T> {
    /// Deliver the platform's answer. Returns false if the caller is no
    /// longer waiting, in which case the answer is discarded.
    pub fn resolve(mut self, outcome: NativeOutcome<T>) -> bool {
        self.settled = true;
        match self.table.upgrade() {
            Some(table) => table.settle(self.id, Settlement::Resolved(Box::new(outcome))),
            None => false,
        }
    }

    pub fn succeed(self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    pub fn fail(self, error: NativeError) -> bool {
        self.resolve(Err(error))
    }
}

impl<T> Completion<T> {
    pub fn request_id(&self) -> RequestId {
        self.id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            table.settle(
                self.id,
                Settlement::Aborted(IapError::Platform {
                    operation: self.operation,
                    message: "platform released the callback without responding".to_string(),
                    code: None,
                }),
            );
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .finish()
    }
}
