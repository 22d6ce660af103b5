use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_core::future::BoxFuture;
use futures_util::FutureExt;

use crate::config::ResolvedRequest;
use crate::error::Error;
use crate::response::ResponseEnvelope;
use crate::util::lock_unpoisoned;

/// What a rejection handler decided to do with an observed failure.
#[derive(Debug)]
pub enum Handled<T> {
    /// Keep failing, possibly with a transformed error.
    Rethrow(Error),
    /// Convert the failure into a recovered value. Honored on the failure
    /// pass; a fulfillment pass that already failed cannot be resumed.
    Recover(T),
}

pub type FulfilledHandler<T> =
    Arc<dyn Fn(T) -> BoxFuture<'static, Result<T, Error>> + Send + Sync>;
pub type RejectedHandler<T> =
    Arc<dyn Fn(Error) -> BoxFuture<'static, Handled<T>> + Send + Sync>;

struct InterceptorSlot<T> {
    fulfilled: Option<FulfilledHandler<T>>,
    rejected: Option<RejectedHandler<T>>,
}

/// An ordered sequence of handler slots with stable integer ids. Ejecting a
/// slot clears its handlers in place; ids are never reused or shifted, so
/// ids held by other call sites stay valid forever.
pub struct InterceptorChain<T> {
    slots: Mutex<Vec<InterceptorSlot<T>>>,
}

impl<T> InterceptorChain<T>
where
    T: Send + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Appends a slot holding an optional fulfillment handler and an
    /// optional rejection handler, returning the slot's stable id.
    pub fn use_handlers(
        &self,
        on_fulfilled: Option<FulfilledHandler<T>>,
        on_rejected: Option<RejectedHandler<T>>,
    ) -> usize {
        let mut slots = lock_unpoisoned(&self.slots);
        slots.push(InterceptorSlot {
            fulfilled: on_fulfilled,
            rejected: on_rejected,
        });
        slots.len() - 1
    }

    /// Registers a fulfillment-only handler from an async closure.
    pub fn on_fulfilled<F, Fut>(&self, handler: F) -> usize
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        self.use_handlers(Some(Arc::new(move |value| handler(value).boxed())), None)
    }

    /// Registers a rejection-only handler from an async closure.
    pub fn on_rejected<F, Fut>(&self, handler: F) -> usize
    where
        F: Fn(Error) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Handled<T>> + Send + 'static,
    {
        self.use_handlers(None, Some(Arc::new(move |error| handler(error).boxed())))
    }

    /// Clears the slot's handlers. A no-op for out-of-range or already
    /// ejected ids; other slots keep their ids and ordering.
    pub fn eject(&self, id: usize) {
        let mut slots = lock_unpoisoned(&self.slots);
        if let Some(slot) = slots.get_mut(id) {
            slot.fulfilled = None;
            slot.rejected = None;
        }
    }

    fn snapshot(&self) -> Vec<(Option<FulfilledHandler<T>>, Option<RejectedHandler<T>>)> {
        lock_unpoisoned(&self.slots)
            .iter()
            .map(|slot| (slot.fulfilled.clone(), slot.rejected.clone()))
            .collect()
    }

    /// Threads a value through every non-ejected fulfillment handler in
    /// registration order, awaiting each before the next starts. When a
    /// handler fails, that same slot's rejection handler observes the
    /// failure, and the error propagates; the half-threaded value is gone,
    /// so a `Recover` returned here cannot resume the pass.
    pub(crate) async fn run(&self, value: T) -> Result<T, Error> {
        let mut current = value;
        for (fulfilled, rejected) in self.snapshot() {
            let Some(handler) = fulfilled else {
                continue;
            };
            match handler(current).await {
                Ok(next) => current = next,
                Err(error) => {
                    let propagated = match rejected {
                        Some(observer) => match observer(error.clone()).await {
                            Handled::Rethrow(next) => next,
                            Handled::Recover(_) => error,
                        },
                        None => error,
                    };
                    return Err(propagated);
                }
            }
        }
        Ok(current)
    }

    /// Threads a failure through every non-ejected rejection handler in
    /// registration order. A handler either rethrows (propagation continues
    /// with the possibly transformed error) or converts the failure into a
    /// recovered value, which settles the pass immediately.
    pub(crate) async fn recover(&self, error: Error) -> Result<T, Error> {
        let mut current = error;
        for (_, rejected) in self.snapshot() {
            let Some(handler) = rejected else {
                continue;
            };
            match handler(current).await {
                Handled::Rethrow(next) => current = next,
                Handled::Recover(value) => return Ok(value),
            }
        }
        Err(current)
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        lock_unpoisoned(&self.slots).len()
    }
}

/// The request-side and response-side chains of one client. Shared across
/// client clones, so registrations are visible everywhere.
pub struct Interceptors {
    pub request: InterceptorChain<ResolvedRequest>,
    pub response: InterceptorChain<ResponseEnvelope>,
}

impl Interceptors {
    pub(crate) fn new() -> Self {
        Self {
            request: InterceptorChain::new(),
            response: InterceptorChain::new(),
        }
    }
}
