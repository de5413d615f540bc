use crate::errors::RequestError;
use crate::notify::NotificationSender;
use crate::probe::ProbeClient;
use crate::registry::{BulkOutcome, PlateRegistry};
use crate::types::{Plate, PlateStatus, StatusPatch};
use log::{error, info, warn};
use serde_json::{json, Value};
use std::env;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 30;

/// Seconds to wait between plates within one cycle, to keep some
/// distance between page fetches. Zero in tests.
pub fn plate_delay_from_env() -> Duration {
    let secs = env::var("PLATE_DELAY_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3);
    Duration::from_secs(secs)
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

#[derive(Debug)]
struct MonitoringState {
    is_active: bool,
    check_interval_minutes: u64,
    registry: PlateRegistry,
    last_check_time: Option<f64>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleSummary {
    pub checked: usize,
    pub found: usize,
    pub cleared: usize,
    pub errored: usize,
    pub alerted: usize,
}

impl CycleSummary {
    pub fn to_json(&self) -> Value {
        json!({
            "checked": self.checked,
            "found": self.found,
            "clear": self.cleared,
            "errors": self.errored,
            "alertsSent": self.alerted,
        })
    }
}

struct Inner {
    state: Mutex<MonitoringState>,
    probe: Arc<dyn ProbeClient>,
    notifier: Arc<dyn NotificationSender>,
    plate_delay: Duration,
    // Re-entrancy guard: at most one cycle at a time, ticks that land
    // mid-cycle are dropped rather than queued.
    cycle_running: AtomicBool,
    // Bumped on every start; a scheduler loop that sees a newer
    // generation retires at its next tick without running.
    generation: AtomicU64,
}

/// Owner of the monitoring state and the check cycle. Cheap to clone;
/// all clones share one state.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(
        probe: Arc<dyn ProbeClient>,
        notifier: Arc<dyn NotificationSender>,
        plate_delay: Duration,
    ) -> Monitor {
        Monitor {
            inner: Arc::new(Inner {
                state: Mutex::new(MonitoringState {
                    is_active: false,
                    check_interval_minutes: DEFAULT_INTERVAL_MINUTES,
                    registry: PlateRegistry::new(),
                    last_check_time: None,
                }),
                probe,
                notifier,
                plate_delay,
                cycle_running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub async fn add_plate(&self, plate_number: &str, contact: &str) -> Result<Plate, RequestError> {
        let mut state = self.inner.state.lock().await;
        state.registry.add(plate_number, contact)
    }

    pub async fn remove_plate(&self, id: &str) -> Result<Plate, RequestError> {
        let mut state = self.inner.state.lock().await;
        state.registry.remove(id)
    }

    pub async fn update_plate(
        &self,
        id: &str,
        plate_number: Option<&str>,
        contact: Option<&str>,
    ) -> Result<Plate, RequestError> {
        let mut state = self.inner.state.lock().await;
        state.registry.update(id, plate_number, contact)
    }

    pub async fn bulk_add(&self, entries: &[(String, String)]) -> BulkOutcome {
        let mut state = self.inner.state.lock().await;
        state.registry.bulk_add(entries)
    }

    pub async fn list_plates(&self) -> Vec<Plate> {
        let state = self.inner.state.lock().await;
        state.registry.list().to_vec()
    }

    /// Begin (or restart) scheduled monitoring. Every plate is reset to
    /// pending for the new session and a scheduler loop is spawned that
    /// fires a cycle every `interval_minutes`, starting one full period
    /// from now.
    pub async fn start(&self, interval_minutes: u64) -> Result<(), RequestError> {
        if interval_minutes == 0 {
            return Err(RequestError::Invalid(
                "check interval must be at least one minute".to_string(),
            ));
        }
        let my_generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.inner.state.lock().await;
            state.is_active = true;
            state.check_interval_minutes = interval_minutes;
            state.registry.reset_for_session();
        }
        let monitor = self.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(interval_minutes * 60);
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                ticks.tick().await;
                let stale = monitor.inner.generation.load(Ordering::SeqCst) != my_generation
                    || !monitor.inner.state.lock().await.is_active;
                if stale {
                    break;
                }
                monitor.run().await;
            }
        });
        info!(
            "Monitoring started, checking every {} minutes",
            interval_minutes
        );
        Ok(())
    }

    /// Stop firing new cycles. A cycle already in flight is left to
    /// finish; only the next tick is suppressed.
    pub async fn stop(&self) {
        let mut state = self.inner.state.lock().await;
        if state.is_active {
            state.is_active = false;
            info!("Monitoring stopped");
        }
    }

    pub async fn snapshot(&self) -> Value {
        let state = self.inner.state.lock().await;
        let mut pending = 0;
        let mut checking = 0;
        let mut clear = 0;
        let mut found = 0;
        let mut errored = 0;
        for plate in state.registry.list() {
            match plate.status {
                PlateStatus::Pending => pending += 1,
                PlateStatus::Checking => checking += 1,
                PlateStatus::Clear => clear += 1,
                PlateStatus::Found => found += 1,
                PlateStatus::Error => errored += 1,
            }
        }
        let plates: Vec<Value> = state.registry.list().iter().map(|p| p.to_json()).collect();
        json!({
            "isActive": state.is_active,
            "checkIntervalMinutes": state.check_interval_minutes,
            "lastCheckTime": state.last_check_time,
            "counts": {
                "total": state.registry.len(),
                "pending": pending,
                "checking": checking,
                "clear": clear,
                "found": found,
                "error": errored,
            },
            "plates": plates,
        })
    }

    /// One pass over the registry. Returns `None` without touching any
    /// state when monitoring is inactive, the registry is empty, or a
    /// previous pass is still executing.
    pub async fn run(&self) -> Option<CycleSummary> {
        if self
            .inner
            .cycle_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Check cycle still running, dropping this tick");
            return None;
        }
        let result = self.run_guarded().await;
        self.inner.cycle_running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_guarded(&self) -> Option<CycleSummary> {
        let ids: Vec<String> = {
            let mut state = self.inner.state.lock().await;
            if !state.is_active || state.registry.is_empty() {
                return None;
            }
            state.last_check_time = Some(now_epoch());
            state.registry.list().iter().map(|p| p.id.clone()).collect()
        };
        info!("Starting check cycle for {} plates", ids.len());
        let mut summary = CycleSummary::default();
        for id in ids {
            self.check_plate(&id, &mut summary).await;
            tokio::time::sleep(self.inner.plate_delay).await;
        }
        info!(
            "Check cycle complete: {} checked, {} found, {} clear, {} errors, {} alerts sent",
            summary.checked, summary.found, summary.cleared, summary.errored, summary.alerted
        );
        Some(summary)
    }

    /// Probe one plate and apply the result. The registry lock is never
    /// held across the probe or the notification send, so removals can
    /// land mid-check; their late results are dropped by `apply_status`.
    async fn check_plate(&self, id: &str, summary: &mut CycleSummary) {
        let (plate_number, had_alert) = {
            let mut state = self.inner.state.lock().await;
            let snapshot = match state.registry.get(id) {
                Some(plate) => (plate.plate_number.clone(), plate.alert_sent),
                None => return, // removed since the cycle started
            };
            state.registry.apply_status(
                id,
                StatusPatch {
                    status: Some(PlateStatus::Checking),
                    last_checked: Some(now_epoch()),
                    ..StatusPatch::default()
                },
            );
            snapshot
        };
        summary.checked += 1;
        match self.inner.probe.check(&plate_number).await {
            Ok(true) => {
                summary.found += 1;
                let contact = {
                    let mut state = self.inner.state.lock().await;
                    state.registry.apply_status(
                        id,
                        StatusPatch {
                            status: Some(PlateStatus::Found),
                            ..StatusPatch::default()
                        },
                    );
                    state.registry.get(id).map(|p| p.contact.clone())
                };
                if had_alert {
                    // Already alerted for this episode.
                    return;
                }
                let contact = match contact {
                    Some(contact) => contact,
                    None => return, // removed mid-check, nobody to alert
                };
                match self.inner.notifier.send(&contact, &plate_number).await {
                    Ok(()) => {
                        summary.alerted += 1;
                        info!("Alert sent for plate {}", plate_number);
                        let mut state = self.inner.state.lock().await;
                        state.registry.apply_status(
                            id,
                            StatusPatch {
                                alert_sent: Some(true),
                                ..StatusPatch::default()
                            },
                        );
                    }
                    Err(e) => {
                        // Leave alert_sent false; the next cycle retries.
                        error!("Failed to send alert for plate {}: {}", plate_number, e);
                    }
                }
            }
            Ok(false) => {
                summary.cleared += 1;
                let mut state = self.inner.state.lock().await;
                state.registry.apply_status(
                    id,
                    StatusPatch {
                        status: Some(PlateStatus::Clear),
                        alert_sent: Some(false),
                        ..StatusPatch::default()
                    },
                );
            }
            Err(e) => {
                summary.errored += 1;
                warn!("Fine check failed for plate {}: {}", plate_number, e);
                let mut state = self.inner.state.lock().await;
                state.registry.apply_status(
                    id,
                    StatusPatch {
                        status: Some(PlateStatus::Error),
                        ..StatusPatch::default()
                    },
                );
            }
        }
    }
}
