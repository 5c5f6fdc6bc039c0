use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

use super::prober::Prober;
use super::types::ProbeResult;
use crate::store::models::now_millis;
use crate::store::{StatusStore, Target, TargetStatus, UpdateOutcome};

/// Sweep cadence and backpressure knobs, resolved from the configuration at
/// startup.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    pub max_in_flight: usize,
    pub shutdown_grace: Duration,
}

/// One classified probe outcome on its way from a probe task to the writer.
struct TargetReport {
    target_id: String,
    result: ProbeResult,
    checked_at_ms: i64,
}

/// The producer loop: sweeps the full registry on a fixed interval,
/// dispatches one bounded probe task per target, and funnels results through
/// a channel into a single writer task.
///
/// Cycles may overlap when probes outlast the interval; the store's
/// timestamp guard keeps late results from clobbering newer ones.
pub struct Scheduler {
    store: Arc<dyn StatusStore>,
    prober: Arc<dyn Prober>,
    sweep: SweepConfig,
    semaphore: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn StatusStore>, prober: Arc<dyn Prober>, sweep: SweepConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(sweep.max_in_flight.max(1)));
        Self { store, prober, sweep, semaphore }
    }

    /// Run sweeps until `shutdown` flips, then drain in-flight probes within
    /// the grace period. Probes still outstanding after the grace period are
    /// abandoned and never reach the store.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let (report_tx, report_rx) = mpsc::channel(self.channel_capacity());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut writer =
            tokio::spawn(reconcile(Arc::clone(&self.store), report_rx, cancel_rx.clone()));

        let mut ticker = interval(self.sweep.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycle: u64 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            cycle += 1;
            let _ = self.run_cycle(cycle, &report_tx, &cancel_rx).await;
        }

        info!("scheduler stopping, draining in-flight probes");
        drop(report_tx);
        if timeout(self.sweep.shutdown_grace, &mut writer).await.is_err() {
            warn!("grace period elapsed, abandoning in-flight probes");
            let _ = cancel_tx.send(true);
            let _ = writer.await;
        }
    }

    /// Single sweep with its own writer, for `--once` mode. Waits for every
    /// probe and every store write before returning.
    pub async fn run_once(&self) {
        let (report_tx, report_rx) = mpsc::channel(self.channel_capacity());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let writer = tokio::spawn(reconcile(Arc::clone(&self.store), report_rx, cancel_rx.clone()));

        if let Some(done) = self.run_cycle(1, &report_tx, &cancel_rx).await {
            let _ = done.await;
        }
        drop(report_tx);
        let _ = writer.await;
    }

    /// Enumerate and dispatch one sweep. Store trouble degrades the cycle to
    /// a log line; the next tick retries. Returns a handle resolving when
    /// every probe of this sweep has finished.
    async fn run_cycle(
        &self,
        cycle: u64,
        report_tx: &mpsc::Sender<TargetReport>,
        cancel: &watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let started = Instant::now();

        let targets = match self.store.list_targets(None).await {
            Ok(targets) => targets,
            Err(error) => {
                warn!(cycle, %error, "target listing failed, skipping sweep");
                return None;
            }
        };
        let stations = match self.store.list_stations().await {
            Ok(stations) => stations.len(),
            Err(error) => {
                debug!(cycle, %error, "station listing failed");
                0
            }
        };

        info!(cycle, targets = targets.len(), stations, "starting sweep");
        if targets.is_empty() {
            warn!(cycle, "no targets to monitor");
            return None;
        }

        let handles: Vec<JoinHandle<()>> = targets
            .into_iter()
            .map(|target| self.spawn_probe(target, report_tx.clone(), cancel.clone()))
            .collect();

        let next_tick = self.sweep.interval;
        Some(tokio::spawn(async move {
            for handle in handles {
                let _ = handle.await;
            }
            info!(
                cycle,
                elapsed_ms = started.elapsed().as_millis() as u64,
                next_tick_s = next_tick.as_secs(),
                "sweep completed"
            );
        }))
    }

    fn spawn_probe(
        &self,
        target: Target,
        report_tx: mpsc::Sender<TargetReport>,
        mut cancel: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let prober = Arc::clone(&self.prober);
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            if *cancel.borrow() {
                return;
            }
            let result = tokio::select! {
                result = prober.probe(&target.url) => result,
                _ = cancel.changed() => {
                    debug!(target = %target.id, "probe abandoned");
                    return;
                }
            };
            // Recheck before handing the result to the write path; an
            // abandoned probe must leave no trace in the store.
            if *cancel.borrow() {
                return;
            }
            let report =
                TargetReport { target_id: target.id, result, checked_at_ms: now_millis() };
            let _ = report_tx.send(report).await;
        })
    }

    fn channel_capacity(&self) -> usize {
        self.sweep.max_in_flight.saturating_mul(2).max(16)
    }
}

/// The single writer: serializes same-target store updates and contains
/// per-result write failures so siblings keep flowing.
async fn reconcile(
    store: Arc<dyn StatusStore>,
    mut reports: mpsc::Receiver<TargetReport>,
    cancel: watch::Receiver<bool>,
) {
    while let Some(report) = reports.recv().await {
        if *cancel.borrow() {
            debug!(target = %report.target_id, "discarding result after cancellation");
            continue;
        }
        let update = report.result.to_status_update(report.checked_at_ms);
        match store.update_target_status(&report.target_id, &update).await {
            Ok(UpdateOutcome::Applied) => log_report(&report),
            Ok(UpdateOutcome::Stale) => {
                debug!(target = %report.target_id, "stale result discarded")
            }
            Ok(UpdateOutcome::Missing) => {
                debug!(target = %report.target_id, "target vanished before write")
            }
            Err(error) => warn!(target = %report.target_id, %error, "status write failed"),
        }
    }
}

fn log_report(report: &TargetReport) {
    let latency_ms = report.result.latency.as_millis() as u64;
    match report.result.status {
        TargetStatus::Up => {
            info!(target = %report.target_id, code = report.result.http_code, latency_ms, "target up")
        }
        TargetStatus::Down => match &report.result.error {
            Some(error) => warn!(
                target = %report.target_id,
                error = error.kind.label(),
                detail = %error.message,
                latency_ms,
                "target down"
            ),
            None => warn!(
                target = %report.target_id,
                code = report.result.http_code,
                latency_ms,
                "target down"
            ),
        },
        TargetStatus::Unknown => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::probe::types::ProbeErrorKind;
    use crate::store::client::MemoryStore;
    use crate::store::models::Station;

    /// Scripted prober: URLs ending in "/down" fail with a timeout, the rest
    /// succeed, and a toggle flips everything to failing. Tracks the number
    /// of concurrently executing probes.
    struct MockProber {
        delay: Duration,
        fail_all: AtomicBool,
        current: AtomicUsize,
        max_seen: AtomicUsize,
        calls: AtomicUsize,
    }

    impl MockProber {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                fail_all: AtomicBool::new(false),
                current: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Prober for MockProber {
        async fn probe(&self, url: &str) -> ProbeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            if self.fail_all.load(Ordering::SeqCst) || url.ends_with("/down") {
                ProbeResult::down_error(ProbeErrorKind::Timeout, "no response", self.delay)
            } else {
                ProbeResult::up(200, self.delay)
            }
        }
    }

    fn scheduler(
        store: &MemoryStore,
        prober: Arc<MockProber>,
        max_in_flight: usize,
    ) -> Scheduler {
        Scheduler::new(
            Arc::new(store.clone()),
            prober,
            SweepConfig {
                interval: Duration::from_secs(60),
                max_in_flight,
                shutdown_grace: Duration::from_millis(100),
            },
        )
    }

    fn seed_targets(store: &MemoryStore, count: usize) {
        store.put_station(Station {
            id: "s1".to_string(),
            name: "Backbone".to_string(),
            targets: (0..count).map(|i| format!("t{i}")).collect(),
        });
        for i in 0..count {
            store.put_target(Target::new(
                format!("t{i}"),
                format!("https://example.com/{i}"),
                Some("s1".to_string()),
            ));
        }
    }

    #[tokio::test]
    async fn sweep_reconciles_every_target() {
        let store = MemoryStore::new();
        seed_targets(&store, 3);
        store.put_target(Target::new("bad", "https://example.com/down", None));

        let prober = Arc::new(MockProber::new(Duration::from_millis(5)));
        scheduler(&store, Arc::clone(&prober), 8).run_once().await;

        for i in 0..3 {
            let target = store.get_target(&format!("t{i}")).await.unwrap().unwrap();
            assert_eq!(target.status, TargetStatus::Up);
            assert_eq!(target.http_code, Some(200));
            assert!(target.last_checked.is_some());
            assert_eq!(target.consecutive_failures, 0);
        }

        let bad = store.get_target("bad").await.unwrap().unwrap();
        assert_eq!(bad.status, TargetStatus::Down);
        assert_eq!(bad.error_message.as_deref(), Some("timeout"));
        assert_eq!(bad.http_code, None);
        assert_eq!(bad.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn in_flight_probes_never_exceed_the_cap() {
        let store = MemoryStore::new();
        seed_targets(&store, 12);

        let prober = Arc::new(MockProber::new(Duration::from_millis(30)));
        scheduler(&store, Arc::clone(&prober), 3).run_once().await;

        assert_eq!(prober.calls.load(Ordering::SeqCst), 12);
        assert!(
            prober.max_seen.load(Ordering::SeqCst) <= 3,
            "saw {} concurrent probes",
            prober.max_seen.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn store_outage_degrades_the_sweep_without_writes() {
        let store = MemoryStore::new();
        seed_targets(&store, 2);
        store.set_unavailable(true);

        let prober = Arc::new(MockProber::new(Duration::from_millis(5)));
        let scheduler = scheduler(&store, Arc::clone(&prober), 4);
        scheduler.run_once().await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);

        // Next tick recovers once the store is back.
        store.set_unavailable(false);
        scheduler.run_once().await;
        let target = store.get_target("t0").await.unwrap().unwrap();
        assert_eq!(target.status, TargetStatus::Up);
    }

    #[tokio::test]
    async fn failure_count_tracks_down_streaks_across_sweeps() {
        let store = MemoryStore::new();
        seed_targets(&store, 1);

        let prober = Arc::new(MockProber::new(Duration::from_millis(2)));
        let scheduler = scheduler(&store, Arc::clone(&prober), 4);

        prober.fail_all.store(true, Ordering::SeqCst);
        for expected in 1..=2u32 {
            scheduler.run_once().await;
            let target = store.get_target("t0").await.unwrap().unwrap();
            assert_eq!(target.status, TargetStatus::Down);
            assert_eq!(target.consecutive_failures, expected);
            // Keep consecutive sweeps on distinct millisecond timestamps.
            tokio::time::sleep(Duration::from_millis(3)).await;
        }

        prober.fail_all.store(false, Ordering::SeqCst);
        scheduler.run_once().await;
        let target = store.get_target("t0").await.unwrap().unwrap();
        assert_eq!(target.status, TargetStatus::Up);
        assert_eq!(target.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn abandoned_probes_leave_no_trace_in_the_store() {
        let store = MemoryStore::new();
        seed_targets(&store, 2);

        // Probes that outlast any reasonable grace period.
        let prober = Arc::new(MockProber::new(Duration::from_secs(60)));
        let scheduler = Arc::new(scheduler(&store, prober, 4));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run(shutdown_rx).await })
        };

        // Let the first sweep dispatch, then ask for shutdown.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler failed to stop within the grace period")
            .unwrap();

        for id in ["t0", "t1"] {
            let target = store.get_target(id).await.unwrap().unwrap();
            assert_eq!(target.status, TargetStatus::Unknown);
            assert_eq!(target.last_checked, None);
        }
    }
}
