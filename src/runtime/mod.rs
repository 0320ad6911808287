//! Fiber runtime: carrier pool ownership, spawning, and strand handles.
//!
//! A [`FiberRuntime`] owns a pool of carrier threads that poll fiber tasks.
//! Spawning wraps the computation so its outcome (value, panic, or
//! interruption) lands in a [`StrandHandle`], the uniform handle shared by
//! fibers and dedicated threads.

mod scheduler;
mod task;

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{GetError, JoinError, SpawnError};
use crate::monitor::{FiberMonitor, NoopMonitor};
use crate::strand::{self, Strand, StrandKind};
use crate::suspend::SuspendGraph;
use crate::types::{FiberId, PanicPayload};
use crate::dataflow::DelayedVal;

use scheduler::SchedulerShared;
use task::FiberTask;

/// Outcome recorded when a strand's computation finishes.
type Completion = Result<(), Arc<PanicPayload>>;

/// Point-in-time counters for a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Fibers spawned on this runtime and not yet terminated.
    pub active_fibers: usize,
    /// Fibers currently parked waiting for a wake.
    pub suspended_fibers: usize,
}

/// Configures a [`FiberRuntime`] before it starts its carriers.
pub struct RuntimeBuilder {
    carriers: usize,
    monitor: Arc<dyn FiberMonitor>,
    thread_name: String,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        let carriers = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);
        Self {
            carriers,
            monitor: Arc::new(NoopMonitor),
            thread_name: "fibra-carrier".to_string(),
        }
    }

    /// Number of carrier threads. Defaults to available parallelism.
    pub fn carriers(mut self, carriers: usize) -> Self {
        self.carriers = carriers.max(1);
        self
    }

    /// Installs a lifecycle monitor. Defaults to [`NoopMonitor`].
    pub fn monitor(mut self, monitor: Arc<dyn FiberMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Carrier thread name prefix.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn build(self) -> FiberRuntime {
        let shared = SchedulerShared::new(self.carriers, self.monitor);
        let mut handles = Vec::with_capacity(self.carriers);
        for index in 0..self.carriers {
            let worker = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("{}-{index}", self.thread_name))
                .spawn(move || worker.carrier_loop(index))
                .expect("failed to spawn carrier thread");
            handles.push(handle);
        }
        tracing::debug!(carriers = self.carriers, "fiber runtime started");
        FiberRuntime {
            inner: Arc::new(RuntimeInner {
                shared,
                carriers: Mutex::new(handles),
            }),
        }
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A pool of carrier threads hosting lightweight fibers.
///
/// Cloning shares the same pool. Dropping the last clone shuts the pool
/// down and joins its carriers.
#[derive(Clone)]
pub struct FiberRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    shared: Arc<SchedulerShared>,
    carriers: Mutex<Vec<JoinHandle<()>>>,
}

impl FiberRuntime {
    /// A runtime with default settings.
    pub fn new() -> Self {
        RuntimeBuilder::new().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Spawns a fiber and returns its handle.
    ///
    /// The fiber is a resumable state machine scheduled across this
    /// runtime's carriers; a panic inside it is captured into the handle
    /// rather than tearing down the carrier.
    pub fn spawn<T, F>(&self, future: F) -> StrandHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = FiberId::next();
        let strand = Strand::new(StrandKind::Fiber(id));
        let completion: DelayedVal<Completion> = DelayedVal::new();
        let value: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));

        let wrapper = {
            let completion = completion.clone();
            let value = Arc::clone(&value);
            async move {
                match CatchUnwind::new(future).await {
                    Ok(out) => {
                        *value.lock() = Some(out);
                        let _ = completion.set(Ok(()));
                    }
                    Err(payload) => {
                        let _ = completion.set(Err(Arc::new(payload)));
                    }
                }
            }
        };

        let shared = &self.inner.shared;
        let task = FiberTask::new(
            id,
            strand.clone(),
            Box::pin(wrapper),
            Arc::downgrade(shared),
        );
        shared.active.fetch_add(1, Ordering::Relaxed);
        shared.monitor.fiber_started(id);
        shared.enqueue(task);

        StrandHandle {
            strand,
            completion,
            value,
        }
    }

    /// Spawns a fiber after checking that its entrypoint was classified
    /// suspendable by `graph`.
    pub fn spawn_classified<T, F>(
        &self,
        graph: &SuspendGraph,
        entrypoint: &str,
        future: F,
    ) -> Result<StrandHandle<T>, SpawnError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.inner.shared.is_shutting_down() {
            return Err(SpawnError::Shutdown);
        }
        let descriptor = graph
            .descriptor_by_name(entrypoint)
            .ok_or_else(|| SpawnError::Unknown(entrypoint.to_string()))?;
        if !descriptor.is_suspendable() {
            return Err(SpawnError::NotSuspendable(entrypoint.to_string()));
        }
        Ok(self.spawn(future))
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            active_fibers: self.inner.shared.active.load(Ordering::Relaxed),
            suspended_fibers: self.inner.shared.suspended.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting carriers from parking and joins them once the ready
    /// queues drain. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown_and_join();
    }
}

impl Default for FiberRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FiberRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberRuntime")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl RuntimeInner {
    fn shutdown_and_join(&self) {
        self.shared.begin_shutdown();
        let handles = std::mem::take(&mut *self.carriers.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

/// Spawns a computation on a dedicated OS thread, returning the same
/// handle type fibers get.
///
/// The thread blocks on the computation via [`strand::block_on`] so it can
/// await the same primitives fibers do, at the cost of holding a kernel
/// thread while parked.
pub fn spawn_thread<T, F>(future: F) -> StrandHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let strand = Strand::new(StrandKind::Thread);
    let completion: DelayedVal<Completion> = DelayedVal::new();
    let value: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));

    let body = {
        let strand = strand.clone();
        let completion = completion.clone();
        let value = Arc::clone(&value);
        move || {
            let _current = strand::enter(strand);
            match strand::block_on(CatchUnwind::new(future)) {
                Ok(out) => {
                    *value.lock() = Some(out);
                    let _ = completion.set(Ok(()));
                }
                Err(payload) => {
                    let _ = completion.set(Err(Arc::new(payload)));
                }
            }
        }
    };
    std::thread::Builder::new()
        .name("fibra-strand".to_string())
        .spawn(body)
        .expect("failed to spawn strand thread");

    StrandHandle {
        strand,
        completion,
        value,
    }
}

/// Handle to a running strand: join it, take its result, interrupt it.
///
/// The same type regardless of whether the strand is a fiber or a
/// dedicated thread.
pub struct StrandHandle<T> {
    strand: Strand,
    completion: DelayedVal<Completion>,
    value: Arc<Mutex<Option<T>>>,
}

impl<T: Send + 'static> StrandHandle<T> {
    /// The underlying strand, for identity and interruption.
    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    /// Requests interruption of the strand's computation.
    ///
    /// Cooperative: the flag is delivered the next time the strand parks
    /// in (or is already parked in) an interruptible primitive.
    pub fn interrupt(&self) {
        self.strand.interrupt();
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// Waits for the strand to terminate.
    ///
    /// `Err(JoinError::Interrupted)` reports interruption of the *joining*
    /// strand, not of the joined one.
    pub async fn join(&self) -> Result<(), JoinError> {
        Self::completed(self.completion.get().await)
    }

    /// [`join`](Self::join) with a deadline.
    pub async fn join_timeout(&self, duration: Duration) -> Result<(), JoinError> {
        Self::completed(self.completion.get_timeout(duration).await)
    }

    /// Waits for termination and takes the result value.
    ///
    /// A second call (from a cloneless handle this cannot happen, but the
    /// value slot is shared with nothing else) reports
    /// [`JoinError::ResultTaken`].
    pub async fn get(&self) -> Result<T, JoinError> {
        self.join().await?;
        self.take_value()
    }

    /// [`get`](Self::get) with a deadline.
    pub async fn get_timeout(&self, duration: Duration) -> Result<T, JoinError> {
        self.join_timeout(duration).await?;
        self.take_value()
    }

    /// [`get`](Self::get) until an absolute deadline.
    pub async fn get_deadline(&self, deadline: Instant) -> Result<T, JoinError> {
        match self.completion.get_deadline(deadline).await {
            Ok(completion) => {
                Self::completed(Ok(completion))?;
                self.take_value()
            }
            Err(err) => Err(Self::map_get_error(err)),
        }
    }

    /// Blocking variant of [`get`](Self::get) for plain threads.
    pub fn get_blocking(&self) -> Result<T, JoinError> {
        strand::block_on(self.get())
    }

    /// Blocking variant of [`join`](Self::join) for plain threads.
    pub fn join_blocking(&self) -> Result<(), JoinError> {
        strand::block_on(self.join())
    }

    fn take_value(&self) -> Result<T, JoinError> {
        self.value.lock().take().ok_or(JoinError::ResultTaken)
    }

    fn completed(outcome: Result<Completion, GetError>) -> Result<(), JoinError> {
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(payload)) => Err(JoinError::Panicked(payload)),
            Err(err) => Err(Self::map_get_error(err)),
        }
    }

    fn map_get_error(err: GetError) -> JoinError {
        match err {
            GetError::Timeout => JoinError::Timeout,
            GetError::Interrupted => JoinError::Interrupted,
        }
    }
}

impl<T> std::fmt::Debug for StrandHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrandHandle")
            .field("kind", &self.strand.kind())
            .field("done", &self.completion.is_done())
            .finish_non_exhaustive()
    }
}

/// Adapter that converts a panic inside the wrapped future into an error
/// value carrying the panic message.
pub(crate) struct CatchUnwind<F> {
    inner: Pin<Box<F>>,
}

impl<F: Future> CatchUnwind<F> {
    pub(crate) fn new(inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, PanicPayload>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match catch_unwind(AssertUnwindSafe(|| this.inner.as_mut().poll(cx))) {
            Ok(Poll::Ready(out)) => Poll::Ready(Ok(out)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(PanicPayload::new(
                crate::types::payload_to_string(payload.as_ref()),
            ))),
        }
    }
}
