use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_core::future::BoxFuture;
use futures_util::FutureExt;
use futures_util::future::Shared;

use crate::error::Error;
use crate::response::ResponseEnvelope;
use crate::util::lock_unpoisoned;

pub(crate) type FlightFuture = BoxFuture<'static, Result<ResponseEnvelope, Error>>;
type SharedFlight = Shared<FlightFuture>;

struct PendingEntry {
    generation: u64,
    outcome: SharedFlight,
}

pub(crate) struct FlightOutcome {
    pub(crate) result: Result<ResponseEnvelope, Error>,
    /// True only for the caller that started the flight. Joined callers
    /// share the result but never led the underlying operation.
    pub(crate) led: bool,
    /// True when this caller led the flight and its registration was still
    /// present at settle time. A cancelled key settles with this false, so
    /// late results are absorbed without side effects.
    pub(crate) registration_survived: bool,
}

/// Collapses concurrent operations sharing a fingerprint into one in-flight
/// call. The registration is removed when the operation settles, success or
/// failure alike; cancellation only drops the bookkeeping entry and never
/// interrupts a call the transport already started.
pub(crate) struct SingleFlight {
    pending: Mutex<BTreeMap<String, PendingEntry>>,
    next_generation: AtomicU64,
}

enum Role {
    Leader(u64),
    Joiner,
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Joins the in-flight call registered under `key`, or starts
    /// `operation` and registers it. The operation future is dropped
    /// unpolled when an existing flight is joined.
    pub(crate) async fn execute(&self, key: &str, operation: FlightFuture) -> FlightOutcome {
        let (outcome, role) = {
            let mut pending = lock_unpoisoned(&self.pending);
            match pending.get(key) {
                Some(entry) => (entry.outcome.clone(), Role::Joiner),
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let shared = operation.shared();
                    pending.insert(
                        key.to_owned(),
                        PendingEntry {
                            generation,
                            outcome: shared.clone(),
                        },
                    );
                    (shared, Role::Leader(generation))
                }
            }
        };

        match role {
            Role::Leader(generation) => {
                let guard = LeaderGuard {
                    flight: self,
                    key,
                    generation,
                    finished: false,
                };
                let result = outcome.await;
                let registration_survived = guard.finish();
                FlightOutcome {
                    result,
                    led: true,
                    registration_survived,
                }
            }
            Role::Joiner => FlightOutcome {
                result: outcome.await,
                led: false,
                registration_survived: false,
            },
        }
    }

    /// Drops the bookkeeping entry for a fingerprint. Returns whether one
    /// was registered. Joined callers keep their handle on the shared
    /// outcome and still observe it.
    pub(crate) fn cancel(&self, key: &str) -> bool {
        lock_unpoisoned(&self.pending).remove(key).is_some()
    }

    pub(crate) fn cancel_all(&self) {
        lock_unpoisoned(&self.pending).clear();
    }

    fn remove_registration(&self, key: &str, generation: u64) -> bool {
        let mut pending = lock_unpoisoned(&self.pending);
        let survived = pending
            .get(key)
            .is_some_and(|entry| entry.generation == generation);
        if survived {
            pending.remove(key);
        }
        survived
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        lock_unpoisoned(&self.pending).len()
    }
}

/// Guarantees symmetric cleanup: if the leading caller is dropped at its
/// await point, the registration still comes out of the map.
struct LeaderGuard<'a> {
    flight: &'a SingleFlight,
    key: &'a str,
    generation: u64,
    finished: bool,
}

impl LeaderGuard<'_> {
    fn finish(mut self) -> bool {
        self.finished = true;
        self.flight.remove_registration(self.key, self.generation)
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.flight.remove_registration(self.key, self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::FutureExt;
    use http::HeaderMap;

    use super::SingleFlight;
    use crate::config::ResponseKind;
    use crate::response::ResponseEnvelope;
    use crate::transport::RawResponse;

    fn envelope(body: &str) -> ResponseEnvelope {
        ResponseEnvelope::from_raw(
            RawResponse {
                status: 200,
                headers: HeaderMap::new(),
                body: Bytes::copy_from_slice(body.as_bytes()),
                cookies: Vec::new(),
            },
            ResponseKind::Json,
        )
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_operation() {
        let flight = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let spawn_call = |flight: Arc<SingleFlight>, runs: Arc<AtomicUsize>| async move {
            flight
                .execute(
                    "key",
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(envelope(r#"{"v": 1}"#))
                    }
                    .boxed(),
                )
                .await
        };

        let (first, second, third) = tokio::join!(
            spawn_call(Arc::clone(&flight), Arc::clone(&runs)),
            spawn_call(Arc::clone(&flight), Arc::clone(&runs)),
            spawn_call(Arc::clone(&flight), Arc::clone(&runs)),
        );

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let expected = envelope(r#"{"v": 1}"#);
        assert_eq!(first.result.expect("shared success"), expected);
        assert_eq!(second.result.expect("shared success"), expected);
        assert_eq!(third.result.expect("shared success"), expected);
        assert_eq!(
            [first.led, second.led, third.led]
                .iter()
                .filter(|led| **led)
                .count(),
            1
        );
        assert_eq!(flight.pending_count(), 0);
    }

    #[tokio::test]
    async fn registration_is_removed_after_failure_too() {
        let flight = SingleFlight::new();
        let outcome = flight
            .execute(
                "key",
                async {
                    Err(crate::error::Error::Network {
                        kind: crate::transport::TransportErrorKind::Other,
                        message: "boom".to_owned(),
                        code: None,
                        request: Box::new(crate::config::merge(
                            &crate::config::ClientDefaults::new(String::new()),
                            &crate::config::RequestConfig::new("/x"),
                        )),
                    })
                }
                .boxed(),
            )
            .await;
        assert!(outcome.result.is_err());
        assert!(outcome.registration_survived);
        assert_eq!(flight.pending_count(), 0);
    }

    #[tokio::test]
    async fn sequential_calls_each_run_their_own_operation() {
        let flight = SingleFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let runs = Arc::clone(&runs);
            let outcome = flight
                .execute(
                    "key",
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        Ok(envelope("1"))
                    }
                    .boxed(),
                )
                .await;
            assert!(outcome.result.is_ok());
            assert!(outcome.registration_survived);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancelled_key_settles_without_a_surviving_registration() {
        let flight = Arc::new(SingleFlight::new());
        let flight_for_call = Arc::clone(&flight);
        let call = tokio::spawn(async move {
            flight_for_call
                .execute(
                    "key",
                    async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(envelope("1"))
                    }
                    .boxed(),
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(flight.cancel("key"));
        assert_eq!(flight.pending_count(), 0);

        let outcome = call.await.expect("task completes");
        assert!(outcome.result.is_ok());
        assert!(outcome.led);
        assert!(!outcome.registration_survived);
    }

    #[tokio::test]
    async fn cancel_reports_whether_a_flight_was_registered() {
        let flight = SingleFlight::new();
        assert!(!flight.cancel("missing"));
    }
}
