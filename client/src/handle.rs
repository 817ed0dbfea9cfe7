//! Single-resolution completion handles for mutating calls.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tether_engine::{error::Result, Error, RecordId};
use tokio::sync::oneshot;

/// Outcome of a mutating call, resolved once the remote store has answered.
///
/// Moves from pending to fulfilled or rejected exactly once. Dropping the
/// handle only discards interest: the remote write and any rollback still
/// run.
#[derive(Debug)]
#[must_use = "a completion handle reports whether the remote write succeeded"]
pub struct CompletionHandle<T> {
    /// Record the call writes; `None` when it was rejected before one was chosen
    id: Option<RecordId>,
    rx: oneshot::Receiver<Result<T>>,
}

/// The resolving side of a [`CompletionHandle`].
///
/// Resolution consumes the completer, so a handle can never transition twice.
#[derive(Debug)]
pub(crate) struct Completer<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> CompletionHandle<T> {
    pub(crate) fn pending(id: impl Into<RecordId>) -> (Completer<T>, Self) {
        let (tx, rx) = oneshot::channel();
        let handle = Self {
            id: Some(id.into()),
            rx,
        };
        (Completer { tx }, handle)
    }

    /// A handle that is already rejected.
    pub fn rejected(error: Error) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { id: None, rx }
    }

    /// Id of the record this call writes. Known as soon as the call returns,
    /// so the id of a new record can be used before the add is confirmed.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn abandoned(&self) -> Error {
        Error::RemoteWrite {
            id: self.id.clone().unwrap_or_default(),
            reason: "mutation task ended without reporting an outcome".to_string(),
        }
    }

    /// The outcome, if the call has already settled.
    pub fn try_outcome(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(self.abandoned())),
        }
    }
}

impl<T> Completer<T> {
    pub(crate) fn fulfill(self, value: T) {
        // The caller may have dropped the handle; that is fine
        let _ = self.tx.send(Ok(value));
    }

    pub(crate) fn reject(self, error: Error) {
        let _ = self.tx.send(Err(error));
    }

    pub(crate) fn settle(self, outcome: Result<T>) {
        let _ = self.tx.send(outcome);
    }
}

impl<T> Future for CompletionHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(this.abandoned())))
    }
}
