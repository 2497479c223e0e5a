//! Single-flight request coalescing over a [`TtlStore`].
//!
//! The first caller for a fingerprint becomes the **leader**: it claims the
//! slot with a pending marker, runs the expensive operation, and publishes
//! the result. Callers arriving while the marker is present are
//! **followers**: they wait, bounded by `retry_interval * max_attempts`,
//! until the leader publishes. The ready result is a single-delivery
//! handoff: the first follower to take it deletes the entry, and a caller
//! arriving after that starts a fresh flight.
//!
//! ```text
//!            claim ok                    success
//!   Absent ───────────► Pending(flight) ─────────► Ready ──consume──► Absent
//!                            │ failure / leader dropped
//!                            └──────────────────────────────────────► Absent
//! ```
//!
//! Followers are woken through a `watch` channel carried by the pending
//! slot, so they see the outcome as soon as it exists; the attempt budget
//! is unchanged by this.

use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use quire_core::error::{QuireError, Result};
use quire_core::types::Fingerprint;

use crate::store::{Claim, TtlStore};

/// Terminal outcome of a flight, as broadcast to its followers.
#[derive(Clone, Debug)]
enum Outcome {
    Done(Bytes),
    Failed(String),
}

/// Handle on an in-flight operation.
#[derive(Clone, Debug)]
pub struct Flight {
    id: u64,
    outcome: watch::Receiver<Option<Outcome>>,
}

impl Flight {
    /// Identifier of this flight, unique within its coalescer.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// What the store holds for a fingerprint.
#[derive(Clone, Debug)]
pub enum Slot {
    /// The leader is still running the operation.
    Pending(Flight),
    /// The operation finished; waiting for one follower to take it.
    Ready {
        /// Flight that produced the payload
        flight: u64,
        /// Operation output
        payload: Bytes,
    },
}

impl Slot {
    fn is_pending_flight(&self, id: u64) -> bool {
        matches!(self, Slot::Pending(f) if f.id == id)
    }

    fn is_ready_flight(&self, id: u64) -> bool {
        matches!(self, Slot::Ready { flight, .. } if *flight == id)
    }
}

/// Snapshot of a fingerprint's state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// No entry.
    Absent,
    /// An operation is in flight.
    Pending,
    /// A result is waiting to be consumed.
    Ready(Bytes),
}

/// Counters describing coalescer activity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CoalescerStats {
    /// Operations started by leaders
    pub leaders: u64,
    /// Calls that waited on another caller's flight
    pub followers: u64,
    /// Ready entries taken out of the store by a follower
    pub consumed: u64,
    /// Leader operations that returned an error
    pub failures: u64,
    /// Followers that gave up waiting
    pub timeouts: u64,
}

#[derive(Default)]
struct Counters {
    leaders: AtomicU64,
    followers: AtomicU64,
    consumed: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

/// Deduplicates concurrent identical operations.
pub struct Coalescer<K = Fingerprint> {
    store: Arc<TtlStore<K, Slot>>,
    retry_interval: Duration,
    max_attempts: u32,
    next_flight: AtomicU64,
    counters: Counters,
}

impl<K> Coalescer<K>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    /// Creates a coalescer over `store`, taking the follower wait budget
    /// from the store's configuration.
    pub fn new(store: Arc<TtlStore<K, Slot>>) -> Self {
        let config = store.config();
        let retry_interval = config.retry_interval();
        let max_attempts = config.max_attempts;

        Self {
            store,
            retry_interval,
            max_attempts,
            next_flight: AtomicU64::new(1),
            counters: Counters::default(),
        }
    }

    /// Overrides the follower wait budget.
    pub fn with_wait(mut self, retry_interval: Duration, max_attempts: u32) -> Self {
        self.retry_interval = retry_interval;
        self.max_attempts = max_attempts;
        self
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<TtlStore<K, Slot>> {
        &self.store
    }

    /// Returns what the store currently holds for `key`, without consuming.
    pub fn lookup(&self, key: &K) -> Lookup {
        match self.store.get(key) {
            None => Lookup::Absent,
            Some(Slot::Pending(_)) => Lookup::Pending,
            Some(Slot::Ready { payload, .. }) => Lookup::Ready(payload),
        }
    }

    /// Returns activity counters.
    pub fn stats(&self) -> CoalescerStats {
        let c = &self.counters;
        CoalescerStats {
            leaders: c.leaders.load(Ordering::Relaxed),
            followers: c.followers.load(Ordering::Relaxed),
            consumed: c.consumed.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Runs `operation` for `key` unless an identical one is already in
    /// flight, in which case the caller waits for and shares its output.
    ///
    /// `operation` is invoked at most once, and only if this caller
    /// becomes leader.
    ///
    /// # Errors
    ///
    /// - The operation's own error, unchanged, when this caller led.
    /// - [`QuireError::WaitTimeout`] when this caller followed and the
    ///   leader was still running after the wait budget.
    #[instrument(level = "debug", skip_all, fields(hash = %key))]
    pub async fn execute<F, Fut>(&self, key: &K, operation: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = watch::channel(None);

            let claim = self.store.get_or_insert_with(key.clone(), || {
                Slot::Pending(Flight { id, outcome: rx })
            });

            match claim {
                Claim::Inserted => return self.lead(key, id, tx, operation).await,
                Claim::Existing(Slot::Ready { flight, payload }) => {
                    info!(hash = %key, "Result ready, taking it");
                    if self.consume(key, flight) {
                        return Ok(payload);
                    }
                    debug!(hash = %key, "Result taken by another caller, starting over");
                }
                Claim::Existing(Slot::Pending(flight)) => {
                    info!(hash = %key, "Render in flight, waiting on leader");
                    self.counters.followers.fetch_add(1, Ordering::Relaxed);
                    if let Some(payload) = self.follow(key, flight, &mut attempts, started).await? {
                        return Ok(payload);
                    }
                }
            }
        }
    }

    async fn lead<F, Fut>(
        &self,
        key: &K,
        id: u64,
        tx: watch::Sender<Option<Outcome>>,
        operation: F,
    ) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        self.counters.leaders.fetch_add(1, Ordering::Relaxed);
        debug!(hash = %key, flight = id, "Claimed slot, rendering");

        let mut guard = PendingGuard {
            store: &self.store,
            key,
            flight: id,
            armed: true,
        };
        let result = operation().await;
        guard.armed = false;

        match result {
            Ok(payload) => {
                self.store.set(
                    key.clone(),
                    Slot::Ready {
                        flight: id,
                        payload: payload.clone(),
                    },
                );
                tx.send_replace(Some(Outcome::Done(payload.clone())));
                debug!(hash = %key, flight = id, bytes = payload.len(), "Published result");
                Ok(payload)
            }
            Err(err) => {
                self.store.remove_if(key, |slot| slot.is_pending_flight(id));
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tx.send_replace(Some(Outcome::Failed(err.to_string())));
                warn!(hash = %key, flight = id, error = %err, "Render failed, entry released");
                Err(err)
            }
        }
    }

    /// Waits on `flight`. Returns `Ok(None)` when the flight ended without a
    /// result and the caller should contend for leadership again.
    async fn follow(
        &self,
        key: &K,
        mut flight: Flight,
        attempts: &mut u32,
        started: Instant,
    ) -> Result<Option<Bytes>> {
        loop {
            let outcome = (*flight.outcome.borrow_and_update()).clone();
            match outcome {
                Some(Outcome::Done(payload)) => {
                    self.consume(key, flight.id);
                    info!(hash = %key, "Render finished, returning shared result");
                    return Ok(Some(payload));
                }
                Some(Outcome::Failed(reason)) => {
                    debug!(hash = %key, flight = flight.id, %reason, "Leader failed");
                    return Ok(None);
                }
                None => {}
            }

            if *attempts >= self.max_attempts {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                let waited_ms = started.elapsed().as_millis() as u64;
                info!(hash = %key, waited_ms, "Gave up waiting on render");
                return Err(QuireError::WaitTimeout {
                    fingerprint: key.to_string(),
                    waited_ms,
                });
            }
            *attempts += 1;

            match tokio::time::timeout(self.retry_interval, flight.outcome.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    // Sender gone without a new value: the leader was dropped.
                    let latest = (*flight.outcome.borrow()).clone();
                    if let Some(Outcome::Done(payload)) = latest {
                        self.consume(key, flight.id);
                        return Ok(Some(payload));
                    }
                    debug!(hash = %key, flight = flight.id, "Leader abandoned flight");
                    return Ok(None);
                }
                Err(_) => {
                    debug!(hash = %key, attempt = *attempts, "Render still in flight");
                }
            }
        }
    }

    /// Takes the ready entry produced by `flight` out of the store.
    /// Returns false if another caller already took it.
    fn consume(&self, key: &K, flight: u64) -> bool {
        let taken = self
            .store
            .remove_if(key, |slot| slot.is_ready_flight(flight))
            .is_some();
        if taken {
            self.counters.consumed.fetch_add(1, Ordering::Relaxed);
            debug!(hash = %key, flight, "Consumed result");
        }
        taken
    }
}

/// Releases the leader's pending slot if the leader never reaches a
/// terminal state (its future was dropped or the operation panicked).
struct PendingGuard<'a, K: Eq + Hash + Clone> {
    store: &'a TtlStore<K, Slot>,
    key: &'a K,
    flight: u64,
    armed: bool,
}

impl<K: Eq + Hash + Clone> Drop for PendingGuard<'_, K> {
    fn drop(&mut self) {
        if self.armed {
            let flight = self.flight;
            if self
                .store
                .remove_if(self.key, |slot| slot.is_pending_flight(flight))
                .is_some()
            {
                warn!(flight, "Leader dropped before finishing, pending entry released");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use tokio::task::JoinSet;

    use crate::config::CacheConfig;

    type TestCoalescer = Coalescer<String>;

    fn coalescer(interval_ms: u64, attempts: u32) -> Arc<TestCoalescer> {
        let store = Arc::new(TtlStore::with_config(CacheConfig::default()));
        Arc::new(Coalescer::new(store).with_wait(Duration::from_millis(interval_ms), attempts))
    }

    async fn wait_until_pending(c: &TestCoalescer, key: &String) {
        while c.lookup(key) != Lookup::Pending {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_execution_for_concurrent_calls() {
        let c = coalescer(10, 50);
        let key = "same-request".to_string();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for _ in 0..10 {
            let c = c.clone();
            let key = key.clone();
            let calls = calls.clone();
            tasks.spawn(async move {
                c.execute(&key, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Bytes::from_static(b"%PDF-rendered"))
                })
                .await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            results.push(joined.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r == &Bytes::from_static(b"%PDF-rendered")));
        assert!(!c.store().has(&key));

        let stats = c.stats();
        assert_eq!(stats.leaders, 1);
        assert_eq!(stats.followers, 9);
        assert_eq!(stats.consumed, 1);
    }

    #[tokio::test]
    async fn test_leader_failure_cleans_up() {
        let c = coalescer(10, 5);
        let key = "broken".to_string();
        let calls = AtomicUsize::new(0);

        let err = c
            .execute(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(QuireError::RenderFailed("navigation failed".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, QuireError::RenderFailed(ref m) if m == "navigation failed"));
        assert!(!c.store().has(&key));
        assert_eq!(c.lookup(&key), Lookup::Absent);

        // A fresh call elects a new leader.
        let out = c
            .execute(&key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Bytes::from_static(b"ok"))
            })
            .await
            .unwrap();
        assert_eq!(out, Bytes::from_static(b"ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(c.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_ready_is_consumed_once() {
        let c = coalescer(10, 5);
        let key = "handoff".to_string();
        let calls = AtomicUsize::new(0);
        let render = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"PDF"))
        };

        // Leader leaves the result for followers.
        c.execute(&key, render).await.unwrap();
        assert_eq!(c.lookup(&key), Lookup::Ready(Bytes::from_static(b"PDF")));

        // First reader takes it without rendering.
        let out = c.execute(&key, render).await.unwrap();
        assert_eq!(out, Bytes::from_static(b"PDF"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!c.store().has(&key));

        // The next caller is a new leader.
        c.execute(&key, render).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(c.stats().consumed, 1);
    }

    #[tokio::test]
    async fn test_follower_times_out_on_hung_leader() {
        let c = coalescer(20, 5);
        let key = "hung".to_string();

        let leader = {
            let c = c.clone();
            let key = key.clone();
            tokio::spawn(async move {
                c.execute(&key, || std::future::pending::<Result<Bytes>>()).await
            })
        };
        wait_until_pending(&c, &key).await;

        let started = Instant::now();
        let err = c
            .execute(&key, || async {
                Err(QuireError::InternalError("follower must not render".into()))
            })
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, QuireError::WaitTimeout { .. }));
        assert!(err.is_recoverable());
        assert!(elapsed >= Duration::from_millis(100), "gave up early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1_000), "waited too long: {elapsed:?}");

        // Timing out never touches the leader's entry.
        assert_eq!(c.lookup(&key), Lookup::Pending);
        assert_eq!(c.stats().timeouts, 1);

        // Dropping the leader releases its marker.
        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert!(!c.store().has(&key));
    }

    #[tokio::test]
    async fn test_followers_share_leader_result() {
        let c = coalescer(10, 10);
        let key = "abc123".to_string();
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let (c, key, calls) = (c.clone(), key.clone(), calls.clone());
            tokio::spawn(async move {
                c.execute(&key, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Bytes::from_static(b"PDFDATA"))
                })
                .await
            })
        };
        wait_until_pending(&c, &key).await;

        let follower = |delay_ms: u64| {
            let (c, key, calls) = (c.clone(), key.clone(), calls.clone());
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                c.execute(&key, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Bytes::from_static(b"SECOND"))
                })
                .await
            })
        };
        let early = follower(0);
        let late = follower(20);

        assert_eq!(leader.await.unwrap().unwrap(), Bytes::from_static(b"PDFDATA"));
        assert_eq!(early.await.unwrap().unwrap(), Bytes::from_static(b"PDFDATA"));
        assert_eq!(late.await.unwrap().unwrap(), Bytes::from_static(b"PDFDATA"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.stats().consumed, 1);
        assert!(!c.store().has(&key));
    }

    #[tokio::test]
    async fn test_follower_takes_over_after_leader_failure() {
        let c = coalescer(10, 20);
        let key = "retry-me".to_string();

        let leader = {
            let (c, key) = (c.clone(), key.clone());
            tokio::spawn(async move {
                c.execute(&key, || async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Err(QuireError::RenderFailed("crashed".into()))
                })
                .await
            })
        };
        wait_until_pending(&c, &key).await;

        let out = c
            .execute(&key, || async { Ok(Bytes::from_static(b"second try")) })
            .await
            .unwrap();

        assert!(leader.await.unwrap().is_err());
        assert_eq!(out, Bytes::from_static(b"second try"));
        // The follower led the second flight, so its result awaits a reader.
        assert_eq!(c.lookup(&key), Lookup::Ready(Bytes::from_static(b"second try")));
        assert_eq!(c.stats().leaders, 2);
    }

    #[tokio::test]
    async fn test_follower_reelects_after_leader_is_dropped() {
        let c = coalescer(50, 20);
        let key = "abandoned".to_string();

        let leader = {
            let (c, key) = (c.clone(), key.clone());
            tokio::spawn(async move {
                c.execute(&key, || std::future::pending::<Result<Bytes>>()).await
            })
        };
        wait_until_pending(&c, &key).await;

        let follower = {
            let (c, key) = (c.clone(), key.clone());
            tokio::spawn(async move {
                c.execute(&key, || async { Ok(Bytes::from_static(b"new")) }).await
            })
        };
        while c.stats().followers == 0 {
            tokio::task::yield_now().await;
        }

        let started = Instant::now();
        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        let out = follower.await.unwrap().unwrap();
        assert_eq!(out, Bytes::from_static(b"new"));
        // Woken by the dropped leader, well before the 1s wait budget.
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(c.stats().leaders, 2);
        assert_eq!(c.stats().timeouts, 0);
        assert_eq!(c.lookup(&key), Lookup::Ready(Bytes::from_static(b"new")));
    }

    #[tokio::test]
    async fn test_independent_keys_do_not_interact() {
        let c = coalescer(10, 5);
        let (ka, kb) = ("a".to_string(), "b".to_string());
        let a = c.execute(&ka, || async { Ok(Bytes::from_static(b"A")) });
        let b = c.execute(&kb, || async { Ok(Bytes::from_static(b"B")) });

        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), Bytes::from_static(b"A"));
        assert_eq!(b.unwrap(), Bytes::from_static(b"B"));
        assert_eq!(c.stats().leaders, 2);
        assert_eq!(c.stats().followers, 0);
    }

    #[tokio::test]
    async fn test_swept_pending_marker_elects_new_leader() {
        let c = coalescer(10, 5);
        let key = "swept".to_string();

        // A pending marker whose TTL already lapsed counts as absent.
        let (_tx, rx) = watch::channel(None);
        c.store().set_with_ttl(
            key.clone(),
            Slot::Pending(Flight { id: 0, outcome: rx }),
            Duration::from_millis(1),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        let out = c
            .execute(&key, || async { Ok(Bytes::from_static(b"fresh")) })
            .await
            .unwrap();
        assert_eq!(out, Bytes::from_static(b"fresh"));
        assert_eq!(c.stats().leaders, 1);
    }

    #[test]
    fn test_fingerprint_keys() {
        let store = Arc::new(TtlStore::new());
        let c: Coalescer = Coalescer::new(store);
        let fp = Fingerprint::of("abc123").unwrap();

        assert_eq!(c.lookup(&fp), Lookup::Absent);
        let out = tokio_test::block_on(c.execute(&fp, || async { Ok(Bytes::from_static(b"x")) }));
        assert_eq!(out.unwrap(), Bytes::from_static(b"x"));
        assert!(c.store().has(&fp));
    }
}
