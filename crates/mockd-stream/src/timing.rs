//! Per-stream delay scheduling.

use mockd_core::sse::TimingConfig;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Computes the delay before each event.
///
/// Priority, highest first: per-event override, per-event delay array, burst
/// mode, random delay, fixed delay, zero. Burst state and the RNG live
/// behind a mutex so the scheduler can be shared across the stream task and
/// admin inspection.
pub struct TimingScheduler {
    config: TimingConfig,
    state: Mutex<SchedulerState>,
}

struct SchedulerState {
    burst_emitted: u32,
    paused: bool,
    rng: StdRng,
}

impl TimingScheduler {
    /// Build a scheduler over a copied timing config. The RNG is seeded
    /// from the clock at construction so parallel streams diverge.
    pub fn new(config: TimingConfig) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        TimingScheduler {
            config,
            state: Mutex::new(SchedulerState {
                burst_emitted: 0,
                paused: false,
                rng: StdRng::seed_from_u64(seed),
            }),
        }
    }

    /// Delay applied exactly once before the first event.
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.config.initial_delay_ms.max(0) as u64)
    }

    /// Delay before the event at `event_index`.
    pub fn next_delay(&self, event_index: usize, override_ms: Option<i64>) -> Duration {
        if let Some(ms) = override_ms {
            return Duration::from_millis(ms.max(0) as u64);
        }

        if let Some(ms) = self.config.per_event_delays_ms.get(event_index) {
            return Duration::from_millis((*ms).max(0) as u64);
        }

        if let Some(ref burst) = self.config.burst {
            let mut state = self.state.lock();
            state.burst_emitted += 1;
            if state.burst_emitted >= burst.count {
                state.burst_emitted = 0;
                state.paused = true;
                return Duration::from_millis(burst.pause_ms.max(0) as u64);
            }
            state.paused = false;
            return Duration::from_millis(burst.interval_ms.max(0) as u64);
        }

        if let Some(ref random) = self.config.random {
            let mut state = self.state.lock();
            let ms = state.rng.gen_range(random.min_ms..=random.max_ms);
            return Duration::from_millis(ms.max(0) as u64);
        }

        if let Some(ms) = self.config.fixed_delay_ms {
            return Duration::from_millis(ms.max(0) as u64);
        }

        Duration::ZERO
    }

    /// True while the burst scheduler is in its pause window.
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Restore burst state to post-construction.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.burst_emitted = 0;
        state.paused = false;
    }
}
