use core::any::Any;
use core::future::Future;
use core::panic::AssertUnwindSafe;
use std::panic;
use std::thread::{self, JoinHandle};

use async_channel::{Receiver, Sender};
use async_task::Runnable;
use rk_os::sync::Arc;
use rk_os::sync::atomic::{AtomicBool, Ordering};

use crate::{ExecutorError, Task};

type ThreadCallback = Arc<dyn Fn() + Send + Sync + 'static>;

// -----------------------------------------------------------------------------
// OnDrop

struct CallOnDrop(Option<ThreadCallback>);

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(call) = self.0.as_ref() {
            call();
        }
    }
}

// -----------------------------------------------------------------------------
// ExecutorBuilder

/// Builder for an [`UnboundedQueueExecutor`] backed by worker threads.
///
/// - [`thread_num`]: Number of worker threads. Defaults to the number of
///   logical cores.
/// - [`name_prefix`]: Threads are named `{prefix} ({index})`.
///   Default: `Executor`.
/// - [`stack_size`]: Stack size of each worker. Default is system-dependent.
/// - [`on_thread_spawn`] / [`on_thread_destroy`]: Called once on each worker
///   when it starts and right before it exits.
///
/// [`thread_num`]: ExecutorBuilder::thread_num
/// [`name_prefix`]: ExecutorBuilder::name_prefix
/// [`stack_size`]: ExecutorBuilder::stack_size
/// [`on_thread_spawn`]: ExecutorBuilder::on_thread_spawn
/// [`on_thread_destroy`]: ExecutorBuilder::on_thread_destroy
///
/// # Examples
///
/// ```
/// use rk_task::{ExecutorBuilder, block_on};
///
/// let executor = ExecutorBuilder::new()
///     .thread_num(2)
///     .name_prefix("doc")
///     .build()
///     .unwrap();
///
/// let task = executor.spawn(async { 6 * 7 }).unwrap();
/// assert_eq!(block_on(task), 42);
/// ```
#[derive(Default)]
#[must_use]
pub struct ExecutorBuilder {
    thread_num: Option<usize>,
    stack_size: Option<usize>,
    name_prefix: Option<String>,
    on_thread_spawn: Option<ThreadCallback>,
    on_thread_destroy: Option<ThreadCallback>,
}

impl ExecutorBuilder {
    /// Creates a builder with default settings.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of worker threads. Zero is raised to one.
    #[inline]
    pub fn thread_num(mut self, thread_num: usize) -> Self {
        self.thread_num = Some(thread_num);
        self
    }

    /// Sets the stack size of every worker thread.
    #[inline]
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Sets the prefix of the worker thread names.
    #[inline]
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Sets a callback run on every worker right after it starts.
    pub fn on_thread_spawn(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_thread_spawn = Some(Arc::new(f));
        self
    }

    /// Sets a callback run on every worker right before it exits.
    pub fn on_thread_destroy(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_thread_destroy = Some(Arc::new(f));
        self
    }

    /// Spawns the workers.
    ///
    /// Workers already started are shut down again if a later one fails
    /// to spawn.
    pub fn build(self) -> Result<UnboundedQueueExecutor, ExecutorError> {
        let thread_num = self
            .thread_num
            .unwrap_or_else(|| rk_os::thread::available_parallelism().get())
            .max(1);
        let prefix = self.name_prefix.as_deref().unwrap_or("Executor");

        let mut executor = UnboundedQueueExecutor::with_queue(Vec::with_capacity(thread_num));

        for index in 0..thread_num {
            let name = format!("{prefix} ({index})");
            let receiver = executor.receiver.clone();
            let on_spawn = self.on_thread_spawn.clone();
            let on_destroy = self.on_thread_destroy.clone();

            let mut builder = thread::Builder::new().name(name.clone());
            if let Some(stack_size) = self.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let spawned = builder.spawn(move || {
                if let Some(on_spawn) = on_spawn {
                    on_spawn();
                }
                let _destructor = CallOnDrop(on_destroy);
                worker_loop(&receiver);
            });

            match spawned {
                Ok(handle) => executor.threads.push(handle),
                Err(source) => {
                    log::error!("failed to spawn executor thread `{name}`: {source}");
                    // Dropping joins what was started so far.
                    return Err(ExecutorError::ThreadSpawn { name, source });
                }
            }
        }

        log::debug!("started executor `{prefix}` with {thread_num} thread(s)");
        Ok(executor)
    }
}

// -----------------------------------------------------------------------------
// UnboundedQueueExecutor

/// Runs jobs from an unbounded FIFO queue.
///
/// Two flavors exist:
///
/// - A threaded executor, see [`new`](Self::new) and [`ExecutorBuilder`].
///   Workers pull jobs until the executor is shut down.
/// - A manual executor, see [`manual`](Self::manual), that never runs
///   anything on its own. The owner drives it with
///   [`run_one`](Self::run_one) or [`run_pending`](Self::run_pending).
///
/// Submitting never blocks. [`shutdown`](Self::shutdown) only stops
/// accepting new work: tasks accepted earlier keep being queued when woken.
/// Dropping the executor closes the queue, runs what is still queued and
/// joins the workers. A task woken after that is canceled, see
/// [`Task::fallible`].
///
/// A job that panics is logged and discarded; the worker keeps running.
pub struct UnboundedQueueExecutor {
    accepting: AtomicBool,
    sender: Sender<Runnable>,
    receiver: Receiver<Runnable>,
    threads: Vec<JoinHandle<()>>,
}

impl UnboundedQueueExecutor {
    fn with_queue(threads: Vec<JoinHandle<()>>) -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self {
            accepting: AtomicBool::new(true),
            sender,
            receiver,
            threads,
        }
    }

    /// Starts `thread_count` workers named `{name_prefix} ({index})`.
    pub fn new(thread_count: usize, name_prefix: &str) -> Result<Self, ExecutorError> {
        ExecutorBuilder::new()
            .thread_num(thread_count)
            .name_prefix(name_prefix)
            .build()
    }

    /// Creates an executor without worker threads.
    pub fn manual() -> Self {
        Self::with_queue(Vec::new())
    }

    /// Returns `true` if the executor has no workers.
    #[inline]
    pub fn is_manual(&self) -> bool {
        self.threads.is_empty()
    }

    /// Number of worker threads, zero for a manual executor.
    #[inline]
    pub fn thread_num(&self) -> usize {
        self.threads.len()
    }

    /// Number of jobs waiting to be picked up.
    ///
    /// Jobs currently running are not included.
    #[inline]
    pub fn task_queue_size(&self) -> usize {
        self.sender.len()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        !self.accepting.load(Ordering::Acquire)
    }

    /// Queues a closure.
    pub fn add<F>(&self, job: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn(async move { job() }).map(Task::detach)
    }

    /// Queues a future and returns a handle to its output.
    ///
    /// The future is polled on the executor's threads, and put back in the
    /// queue each time it is woken.
    pub fn spawn<F>(&self, future: F) -> Result<Task<F::Output>, ExecutorError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(ExecutorError::Shutdown);
        }

        // The queue stays open until the executor is dropped, so accepted
        // tasks can always be rescheduled before that.
        let sender = self.sender.clone();
        let schedule = move |runnable: Runnable| {
            // Dropping the runnable cancels the task.
            if sender.try_send(runnable).is_err() {
                log::debug!("executor dropped, canceling a woken task");
            }
        };

        let (runnable, task) = async_task::spawn(future, schedule);
        runnable.schedule();
        Ok(Task(task))
    }

    /// Runs the oldest queued job, if any.
    ///
    /// Returns `false` if the queue was empty.
    pub fn run_one(&self) -> bool {
        match self.receiver.try_recv() {
            Ok(runnable) => {
                run_logged(runnable);
                true
            }
            Err(_) => false,
        }
    }

    /// Runs queued jobs until the queue is empty, including jobs queued by
    /// the jobs being run. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Stops accepting new jobs.
    ///
    /// Everything accepted before the call still runs, including tasks
    /// that are woken later on.
    pub fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            log::debug!("executor shut down with {} queued job(s)", self.sender.len());
        }
    }
}

impl Default for UnboundedQueueExecutor {
    /// One worker per logical core.
    fn default() -> Self {
        let thread_num = rk_os::thread::available_parallelism();
        match ExecutorBuilder::new().thread_num(thread_num.get()).build() {
            Ok(executor) => executor,
            Err(err) => panic!("failed to start the default executor: {err}"),
        }
    }
}

impl Drop for UnboundedQueueExecutor {
    fn drop(&mut self) {
        self.shutdown();
        // Workers exit once the closed queue is empty.
        self.sender.close();

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("executor thread exited with a panic");
            }
        }

        // A manual executor has nobody else to run its queue. Queued
        // runnables hold a sender, so leaving them would leak the queue.
        let ran = self.run_pending();
        if ran != 0 {
            log::debug!("ran {ran} queued job(s) while dropping the executor");
        }
    }
}

impl core::fmt::Debug for UnboundedQueueExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnboundedQueueExecutor")
            .field("thread_num", &self.thread_num())
            .field("task_queue_size", &self.task_queue_size())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Workers

fn worker_loop(receiver: &Receiver<Runnable>) {
    // After the queue is closed this still yields every job left in it.
    while let Ok(runnable) = receiver.recv_blocking() {
        run_logged(runnable);
    }
}

fn run_logged(runnable: Runnable) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| runnable.run())) {
        log::warn!("executor job panicked: {}", panic_message(&*payload));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "Box<dyn Any>"
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{ExecutorBuilder, UnboundedQueueExecutor};
    use crate::{ExecutorError, block_on};

    use rk_ptr::{RefCount, RefPtr, impl_ref_counted};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;

    struct Shared {
        rc: RefCount,
        hits: AtomicUsize,
    }

    impl_ref_counted!(Shared, rc);

    #[test]
    fn is_sync_send() {
        fn is_send<T: Send>() {}
        fn is_sync<T: Sync>() {}

        is_send::<UnboundedQueueExecutor>();
        is_sync::<UnboundedQueueExecutor>();
    }

    #[test]
    fn runs_added_jobs() {
        let executor = UnboundedQueueExecutor::new(2, "runs").unwrap();
        assert_eq!(executor.thread_num(), 2);
        assert!(!executor.is_manual());

        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            executor.add(move || tx.send(i).unwrap()).unwrap();
        }
        drop(tx);

        let mut got: Vec<i32> = rx.iter().collect();
        got.sort_unstable();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn threads_are_named_after_prefix() {
        let executor = UnboundedQueueExecutor::new(1, "named").unwrap();
        let task = executor
            .spawn(async { thread::current().name().map(String::from) })
            .unwrap();
        assert_eq!(block_on(task).as_deref(), Some("named (0)"));
    }

    #[test]
    fn builder_callbacks_run_per_thread() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let destroyed = Arc::new(AtomicUsize::new(0));

        let executor = ExecutorBuilder::new()
            .thread_num(3)
            .name_prefix("callbacks")
            .on_thread_spawn({
                let spawned = spawned.clone();
                move || {
                    spawned.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_thread_destroy({
                let destroyed = destroyed.clone();
                move || {
                    destroyed.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap();

        drop(executor);
        assert_eq!(spawned.load(Ordering::SeqCst), 3);
        assert_eq!(destroyed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_threads_is_raised_to_one() {
        let executor = UnboundedQueueExecutor::new(0, "zero").unwrap();
        assert_eq!(executor.thread_num(), 1);
    }

    #[test]
    fn drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        let executor = UnboundedQueueExecutor::new(1, "drain").unwrap();
        for _ in 0..100 {
            let counter = counter.clone();
            executor
                .add(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        drop(executor);
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn panicking_job_does_not_stop_worker() {
        let executor = UnboundedQueueExecutor::new(1, "panics").unwrap();
        executor.add(|| panic!("boom")).unwrap();

        let task = executor.spawn(async { 7 }).unwrap();
        assert_eq!(block_on(task), 7);
    }

    #[test]
    fn add_after_shutdown_fails() {
        let executor = UnboundedQueueExecutor::new(1, "closed").unwrap();
        executor.shutdown();
        assert!(executor.is_shutdown());
        assert!(matches!(executor.add(|| {}), Err(ExecutorError::Shutdown)));

        let manual = UnboundedQueueExecutor::manual();
        manual.shutdown();
        assert!(matches!(manual.spawn(async {}), Err(ExecutorError::Shutdown)));
    }

    #[test]
    fn manual_runs_in_fifo_order() {
        let executor = UnboundedQueueExecutor::manual();
        assert!(executor.is_manual());
        assert_eq!(executor.thread_num(), 0);

        let (tx, rx) = mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            executor.add(move || tx.send(i).unwrap()).unwrap();
        }
        assert_eq!(executor.task_queue_size(), 3);
        assert!(rx.try_recv().is_err());

        assert!(executor.run_one());
        assert_eq!(rx.try_recv().unwrap(), 0);
        assert_eq!(executor.task_queue_size(), 2);

        assert_eq!(executor.run_pending(), 2);
        assert_eq!(executor.task_queue_size(), 0);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), [1, 2]);
        assert!(!executor.run_one());
    }

    #[test]
    fn manual_run_pending_includes_nested_jobs() {
        let executor = Arc::new(UnboundedQueueExecutor::manual());
        let counter = Arc::new(AtomicUsize::new(0));

        let inner = executor.clone();
        let c = counter.clone();
        executor
            .add(move || {
                let c = c.clone();
                inner
                    .add(move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            })
            .unwrap();

        assert_eq!(executor.run_pending(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_task_completes_after_run() {
        let executor = UnboundedQueueExecutor::manual();
        let task = executor.spawn(async { "done" }).unwrap();
        assert!(!task.is_finished());

        executor.run_pending();
        assert!(task.is_finished());
        assert_eq!(block_on(task), "done");
    }

    #[test]
    fn woken_task_runs_after_shutdown() {
        let executor = UnboundedQueueExecutor::manual();
        let (tx, rx) = async_channel::bounded::<u32>(1);
        let task = executor
            .spawn(async move { rx.recv().await.unwrap() + 1 })
            .unwrap();
        assert_eq!(executor.run_pending(), 1);
        assert!(!task.is_finished());

        executor.shutdown();
        assert!(executor.add(|| {}).is_err());

        tx.try_send(41).unwrap();
        assert_eq!(executor.task_queue_size(), 1);
        assert_eq!(executor.run_pending(), 1);
        assert_eq!(block_on(task), 42);
    }

    #[test]
    fn woken_task_runs_on_workers_after_shutdown() {
        let executor = UnboundedQueueExecutor::new(1, "late").unwrap();
        let (tx, rx) = async_channel::bounded::<u32>(1);
        let task = executor.spawn(async move { rx.recv().await.unwrap() * 2 }).unwrap();

        executor.shutdown();
        tx.send_blocking(21).unwrap();
        assert_eq!(block_on(task), 42);
    }

    #[test]
    fn task_woken_after_drop_is_canceled() {
        let executor = UnboundedQueueExecutor::manual();
        let (tx, rx) = async_channel::bounded::<u32>(1);
        let task = executor.spawn(async move { rx.recv().await.unwrap() }).unwrap();
        assert_eq!(executor.run_pending(), 1);

        drop(executor);
        tx.try_send(1).unwrap();
        assert_eq!(block_on(task.fallible()), None);
    }

    #[test]
    fn dropping_manual_executor_runs_queued_jobs() {
        struct Marker(Arc<AtomicUsize>);

        impl Drop for Marker {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let ran = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        let shared = RefPtr::new(Shared {
            rc: RefCount::new(),
            hits: AtomicUsize::new(0),
        });

        let executor = UnboundedQueueExecutor::manual();
        let marker = Marker(dropped.clone());
        let copy = shared.copy();
        let ran_in_job = ran.clone();
        executor
            .add(move || {
                let _marker = &marker;
                copy.hits.fetch_add(1, Ordering::Relaxed);
                ran_in_job.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(shared.strong_count(), 2);

        drop(executor);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(shared.hits.load(Ordering::Relaxed), 1);
        assert_eq!(shared.strong_count(), 1);
    }

    #[test]
    fn ref_ptr_copies_shared_across_workers() {
        let shared = RefPtr::new(Shared {
            rc: RefCount::new(),
            hits: AtomicUsize::new(0),
        });

        let executor = UnboundedQueueExecutor::new(4, "shared").unwrap();
        for _ in 0..64 {
            let copy = shared.copy();
            executor
                .add(move || {
                    copy.hits.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
        }
        drop(executor);

        assert_eq!(shared.hits.load(Ordering::Relaxed), 64);
        assert_eq!(shared.strong_count(), 1);
    }
}
