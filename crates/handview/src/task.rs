//! Background tasks, one-shot promises, and bounded retries.

use std::{
    fmt, io,
    panic::resume_unwind,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Creates a connected pair of [`Promise`] and [`PromiseHandle`].
pub fn promise<T>() -> (Promise<T>, PromiseHandle<T>) {
    // Capacity of 1 means that `Promise::fulfill` will never block.
    let (sender, recv) = channel::bounded(1);
    (Promise { inner: sender }, PromiseHandle { recv })
}

/// An empty slot that can be filled with a `T`, fulfilling the promise.
///
/// Fulfilling a [`Promise`] lets the connected [`PromiseHandle`] retrieve the value.
pub struct Promise<T> {
    inner: Sender<T>,
}

impl<T> Promise<T> {
    /// Fulfills the promise with a value, consuming it.
    ///
    /// This never blocks or fails. If the connected [`PromiseHandle`] was dropped, `value` is
    /// dropped too.
    pub fn fulfill(self, value: T) {
        self.inner.send(value).ok();
    }
}

/// A handle connected to a [`Promise`] that will eventually resolve to a value of type `T`.
pub struct PromiseHandle<T> {
    recv: Receiver<T>,
}

impl<T> PromiseHandle<T> {
    /// Blocks the calling thread until the [`Promise`] is fulfilled.
    pub fn block(self) -> Result<T, PromiseDropped> {
        self.recv.recv().map_err(|_| PromiseDropped { _priv: () })
    }

    /// Blocks for at most `timeout`, waiting for the [`Promise`] to be fulfilled.
    ///
    /// On timeout, `Ok(Err(self))` is returned so that the caller can keep waiting later.
    pub fn block_timeout(self, timeout: Duration) -> Result<Result<T, Self>, PromiseDropped> {
        match self.recv.recv_timeout(timeout) {
            Ok(value) => Ok(Ok(value)),
            Err(RecvTimeoutError::Timeout) => Ok(Err(self)),
            Err(RecvTimeoutError::Disconnected) => Err(PromiseDropped { _priv: () }),
        }
    }

    /// Takes the value if the [`Promise`] has been fulfilled, without blocking.
    pub fn poll(self) -> Result<Result<T, Self>, PromiseDropped> {
        match self.recv.try_recv() {
            Ok(value) => Ok(Ok(value)),
            Err(TryRecvError::Empty) => Ok(Err(self)),
            Err(TryRecvError::Disconnected) => Err(PromiseDropped { _priv: () }),
        }
    }

    /// Returns whether the associated [`Promise`] has been fulfilled.
    ///
    /// This returns `false` if the [`Promise`] was dropped without being fulfilled.
    pub fn is_fulfilled(&self) -> bool {
        !self.recv.is_empty()
    }
}

/// Error returned when the [`Promise`] connected to a [`PromiseHandle`] was dropped without being
/// fulfilled.
///
/// This typically means that the task that was supposed to produce the value has exited or
/// panicked.
#[derive(Debug, Clone, Copy)]
pub struct PromiseDropped {
    _priv: (),
}

impl fmt::Display for PromiseDropped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("promise was dropped without being fulfilled")
    }
}

impl std::error::Error for PromiseDropped {}

/// A named background thread that is joined when dropped.
///
/// If the thread has panicked, the panic is forwarded to the thread dropping the [`Task`] (unless
/// that thread is already unwinding).
pub struct Task {
    name: String,
    handle: Option<JoinHandle<()>>,
}

impl Task {
    /// Spawns `body` on a new thread called `name`.
    pub fn spawn<N, F>(name: N, body: F) -> io::Result<Self>
    where
        N: Into<String>,
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            log::trace!("task '{thread_name}' starting");
            body();
            log::trace!("task '{thread_name}' exiting");
        })?;

        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    /// Returns the name this task was spawned with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether the task's thread has finished running.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    fn wait_for_exit(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
            }
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.wait_for_exit();
    }
}

/// Runs `op` up to `attempts` times, sleeping `delay` between failed attempts.
///
/// Every failure except the last one is logged as a warning. The last error is returned if no
/// attempt succeeds. `attempts` values of 0 are treated as 1.
pub fn retry<T, F>(what: &str, attempts: u32, delay: Duration, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> anyhow::Result<T>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                log::warn!("{what} failed (attempt {attempt}/{attempts}): {e:#}");
                attempt += 1;
                thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}
