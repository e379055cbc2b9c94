//! Single-resolution completions
//!
//! Turns callback-style completion into one awaitable outcome. A `Completer`
//! is consumed by resolving it, so a request can never be answered twice, and
//! a `Completion` whose completer was dropped unresolved still yields exactly
//! one outcome (the error's `abandoned()` value) instead of hanging.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

/// Error types that can describe a completion whose completer went away.
pub trait Abandoned {
    fn abandoned() -> Self;
}

/// Create a linked completer/completion pair.
pub fn completion<T, E: Abandoned>() -> (Completer<T, E>, Completion<T, E>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Completion { rx })
}

/// Resolving half. Every method takes `self`.
#[derive(Debug)]
pub struct Completer<T, E> {
    tx: oneshot::Sender<Result<T, E>>,
}

impl<T, E> Completer<T, E> {
    pub fn success(self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn error(self, error: E) {
        self.resolve(Err(error));
    }

    /// Deliver the outcome. A receiver that has gone away is not an error:
    /// the caller stopped waiting.
    pub fn resolve(self, outcome: Result<T, E>) {
        if self.tx.send(outcome).is_err() {
            tracing::debug!("Completion receiver dropped before resolution");
        }
    }

    /// True once the waiting side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Awaitable half.
#[derive(Debug)]
pub struct Completion<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E: Abandoned> Future for Completion<T, E> {
    type Output = Result<T, E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::abandoned())),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Gone,
        Failed(&'static str),
    }

    impl Abandoned for TestError {
        fn abandoned() -> Self {
            TestError::Gone
        }
    }

    #[test]
    fn test_pending_until_resolved() {
        let (completer, completion) = completion::<u32, TestError>();
        let mut fut = task::spawn(completion);

        assert_pending!(fut.poll());
        completer.success(7);

        assert!(fut.is_woken());
        assert_ready_eq!(fut.poll(), Ok(7));
    }

    #[test]
    fn test_error_resolution() {
        let (completer, completion) = completion::<u32, TestError>();
        let mut fut = task::spawn(completion);

        completer.error(TestError::Failed("boom"));
        assert_ready_eq!(fut.poll(), Err(TestError::Failed("boom")));
    }

    #[test]
    fn test_dropped_completer_yields_abandoned() {
        let (completer, completion) = completion::<u32, TestError>();
        let mut fut = task::spawn(completion);

        assert_pending!(fut.poll());
        drop(completer);
        assert_ready_eq!(fut.poll(), Err(TestError::Gone));
    }

    #[test]
    fn test_completer_sees_closed_receiver() {
        let (completer, completion) = completion::<u32, TestError>();
        assert!(!completer.is_closed());
        drop(completion);
        assert!(completer.is_closed());
        // Resolving after the receiver left must not panic.
        completer.success(1);
    }

    #[tokio::test]
    async fn test_resolved_from_another_task() {
        let (completer, completion) = completion::<String, TestError>();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            completer.success("done".to_string());
        });

        assert_eq!(completion.await, Ok("done".to_string()));
    }
}
