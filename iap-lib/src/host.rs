//! Callback adapter for hosts that cannot await Rust futures.
//!
//! Swift and Kotlin bindings drive the manager through a [`HostRuntime`]:
//! each call is spawned on the runtime and its result delivered to a
//! [`ResultCallback`]. Cancelling the returned [`AsyncHandle`] stops the
//! callback from firing; like dropping a future, it does not abort the store
//! operation. Dropping the handle without cancelling detaches it and the
//! callback still fires.
//!
//! ```
//! use std::sync::Arc;
//! use iap_lib::host::{FnCallback, HostRuntime};
//! use iap_lib::prelude::*;
//!
//! let runtime = HostRuntime::new().unwrap();
//! let store = Arc::new(SandboxStore::new(PlatformKind::StoreKit));
//! let manager: Arc<IapManager<StoreKit>> = Arc::new(IapManager::new(store));
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! let connecting = manager.clone();
//! let _handle = runtime.spawn_with_callback(
//!     async move { connecting.connect().await },
//!     Arc::new(FnCallback::new(
//!         move |()| tx.send(true).unwrap(),
//!         |_error| {},
//!     )),
//! );
//! assert!(rx.recv().unwrap());
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::errors::{IapError, IapResult};

/// Receives the result of a spawned operation. Implemented by host code.
pub trait ResultCallback<T>: Send + Sync {
    fn on_success(&self, value: T);
    fn on_error(&self, error: IapError);
}

/// Cancels delivery of a spawned operation's result.
///
/// Dropping the handle does not cancel.
#[derive(Debug)]
pub struct AsyncHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl AsyncHandle {
    fn new(cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Stop waiting. The callback will not be invoked unless it already
    /// started.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_tx.is_none()
    }
}

/// Tokio runtime owned by the host binding.
pub struct HostRuntime {
    runtime: tokio::runtime::Runtime,
}

impl HostRuntime {
    pub fn new() -> std::io::Result<Self> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map(|runtime| Self { runtime })
    }

    pub fn with_threads(worker_threads: usize) -> std::io::Result<Self> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .enable_all()
            .build()
            .map(|runtime| Self { runtime })
    }

    /// Run a future to completion on the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if called from inside a Tokio runtime. Call it from host
    /// threads only (main thread, GCD queues, executor threads).
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Spawn an operation and report its result through `callback`.
    pub fn spawn_with_callback<F, T, C>(&self, future: F, callback: Arc<C>) -> AsyncHandle
    where
        F: Future<Output = IapResult<T>> + Send + 'static,
        T: Send + 'static,
        C: ResultCallback<T> + ?Sized + 'static,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel();

        self.runtime.spawn(async move {
            // A dropped handle closes the channel without a value; only an
            // explicit cancel wins, and it wins over a finished future.
            tokio::select! {
                biased;
                Ok(()) = cancel_rx => {
                    tracing::trace!("host operation cancelled");
                }
                result = future => match result {
                    Ok(value) => callback.on_success(value),
                    Err(error) => callback.on_error(error),
                },
            }
        });

        AsyncHandle::new(cancel_tx)
    }

    /// Spawn a task whose result nobody waits for.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }
}

/// [`ResultCallback`] built from two closures.
pub struct FnCallback<T> {
    success_fn: Box<dyn Fn(T) + Send + Sync>,
    error_fn: Box<dyn Fn(IapError) + Send + Sync>,
}

impl<T> FnCallback<T> {
    pub fn new<S, E>(success_fn: S, error_fn: E) -> Self
    where
        S: Fn(T) + Send + Sync + 'static,
        E: Fn(IapError) + Send + Sync + 'static,
    {
        Self {
            success_fn: Box::new(success_fn),
            error_fn: Box::new(error_fn),
        }
    }
}

impl<T: Send> ResultCallback<T> for FnCallback<T> {
    fn on_success(&self, value: T) {
        (self.success_fn)(value);
    }

    fn on_error(&self, error: IapError) {
        (self.error_fn)(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::errors::Operation;

    #[test]
    fn test_callback_receives_error() {
        let runtime = HostRuntime::with_threads(1).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);

        let _handle = runtime.spawn_with_callback(
            async {
                Err::<(), _>(IapError::NotReady {
                    operation: Operation::Restore,
                })
            },
            Arc::new(FnCallback::new(
                |_| {},
                move |error| tx.lock().unwrap().send(error).unwrap(),
            )),
        );

        let error = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(error.is_retryable());
    }

    #[test]
    fn test_cancelled_handle_suppresses_callback() {
        let runtime = HostRuntime::with_threads(1).unwrap();
        let (tx, rx) = mpsc::channel::<u32>();
        let tx = std::sync::Mutex::new(tx);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let mut handle = runtime.spawn_with_callback(
            async move {
                let _ = release_rx.await;
                Ok(1)
            },
            Arc::new(FnCallback::new(
                move |value| tx.lock().unwrap().send(value).unwrap(),
                |_| {},
            )),
        );
        handle.cancel();
        assert!(handle.is_cancelled());
        let _ = release_tx.send(());

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_cancel_wins_over_finished_future() {
        let runtime = HostRuntime::with_threads(1).unwrap();
        let (tx, rx) = mpsc::channel::<u32>();
        let tx = std::sync::Mutex::new(tx);
        let callback = Arc::new(FnCallback::new(
            move |value| tx.lock().unwrap().send(value).unwrap(),
            |_| {},
        ));

        // Park the only worker so each task is first polled after cancel().
        let (park_tx, park_rx) = mpsc::channel::<()>();
        runtime.spawn(async move {
            let _ = park_rx.recv();
        });
        let mut handles: Vec<_> = (0..50)
            .map(|i| runtime.spawn_with_callback(async move { Ok(i) }, callback.clone()))
            .collect();
        for handle in &mut handles {
            handle.cancel();
        }
        park_tx.send(()).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_dropped_handle_still_delivers() {
        let runtime = HostRuntime::with_threads(2).unwrap();
        let (tx, rx) = mpsc::channel::<u32>();
        let tx = std::sync::Mutex::new(tx);
        let callback = Arc::new(FnCallback::new(
            move |value| tx.lock().unwrap().send(value).unwrap(),
            |_| {},
        ));

        for i in 0..50 {
            drop(runtime.spawn_with_callback(async move { Ok(i) }, callback.clone()));
        }

        let mut delivered: Vec<u32> = (0..50)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        delivered.sort_unstable();
        assert_eq!(delivered, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_block_on() {
        let runtime = HostRuntime::new().unwrap();
        assert_eq!(runtime.block_on(async { 2 + 2 }), 4);
    }
}
