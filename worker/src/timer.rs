use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Accumulates per-phase durations across a job's pipeline (§9 "timer
/// scope"). A [`PhaseGuard`] records its elapsed time on `Drop`, so a
/// `?`-propagated error mid-phase still contributes a timing entry instead
/// of silently dropping it — the failure case is exactly where accurate
/// timing matters most for debugging.
#[derive(Clone)]
pub struct Timer {
    phases: Arc<Mutex<HashMap<String, f64>>>,
}

impl Timer {
    pub fn new() -> Self {
        Self { phases: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn scope(&self, phase: &str) -> PhaseGuard {
        PhaseGuard { phases: self.phases.clone(), name: phase.to_string(), start: Instant::now() }
    }

    /// Converts every accumulated phase to milliseconds, rounded to 2
    /// decimals (§3 result envelope contract).
    pub fn into_millis(self) -> HashMap<String, f64> {
        let phases = self.phases.lock().expect("timer mutex poisoned");
        phases.iter().map(|(name, secs)| (name.clone(), round2(secs * 1000.0))).collect()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PhaseGuard {
    phases: Arc<Mutex<HashMap<String, f64>>>,
    name: String,
    start: Instant,
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        let mut phases = self.phases.lock().expect("timer mutex poisoned");
        *phases.entry(std::mem::take(&mut self.name)).or_insert(0.0) += elapsed;
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
