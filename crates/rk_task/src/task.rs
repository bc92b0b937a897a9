use core::fmt;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

// -----------------------------------------------------------------------------
// Task

/// Handle to a future queued on an
/// [`UnboundedQueueExecutor`](crate::UnboundedQueueExecutor).
///
/// Awaiting the handle yields the future's output. Dropping it cancels the
/// future; [`detach`](Task::detach) lets it run to completion unobserved.
///
/// # Cancellation by the executor
///
/// Once its executor is dropped, a task that is woken again is canceled
/// instead of queued. Awaiting such a task directly panics; await
/// [`fallible`](Task::fallible) to observe the cancellation as [`None`].
#[must_use = "Tasks are canceled when dropped, use `.detach()` to run them in the background."]
#[repr(transparent)]
pub struct Task<T>(pub(crate) async_task::Task<T>);

impl<T> Task<T> {
    /// Lets the future run without a handle.
    #[inline(always)]
    pub fn detach(self) {
        self.0.detach();
    }

    /// Cancels the future and waits until it stopped running.
    ///
    /// Returns the output if the future completed before it could be canceled.
    #[inline(always)]
    pub async fn cancel(self) -> Option<T> {
        self.0.cancel().await
    }

    /// Converts into a future resolving to [`None`] if the task was canceled
    /// by its executor.
    #[inline(always)]
    pub fn fallible(self) -> async_task::FallibleTask<T> {
        self.0.fallible()
    }

    /// Returns `true` once the future completed or was canceled.
    #[inline(always)]
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    #[inline(always)]
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::Task;
    use crate::{UnboundedQueueExecutor, block_on};

    #[test]
    fn is_sync_send() {
        fn is_sync<T: Sync>() {}
        is_sync::<Task<()>>();

        fn is_send<T: Send>() {}
        is_send::<Task<()>>();
    }

    #[test]
    fn cancel_after_completion_returns_output() {
        let executor = UnboundedQueueExecutor::manual();
        let task = executor.spawn(async { 1 }).unwrap();
        executor.run_pending();
        assert_eq!(block_on(task.cancel()), Some(1));
    }

    #[test]
    fn fallible_yields_output() {
        let executor = UnboundedQueueExecutor::manual();
        let task = executor.spawn(async { "ok" }).unwrap();
        executor.run_pending();
        assert_eq!(block_on(task.fallible()), Some("ok"));
    }
}
