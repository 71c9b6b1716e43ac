// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Shared simulation clock.
//!
//! One instance per process, owned by the master; every actor reads "now"
//! through a [`ClockHandle`] so the whole process observes a single,
//! consistent simulated time. `now()` is always derived from the wall-clock
//! delta since the last anchor, never incremented, so it cannot drift.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
struct ClockState {
    /// Simulated time at the last reset/resume boundary.
    sim_anchor: DateTime<Utc>,
    /// Wall time corresponding to `sim_anchor`.
    wall_anchor: Instant,
    /// Ratio of simulated time to wall time.
    scale: f64,
    running: bool,
}

impl ClockState {
    fn now(&self) -> DateTime<Utc> {
        if self.running {
            let elapsed = self.wall_anchor.elapsed().as_secs_f64() * self.scale;
            self.sim_anchor + ChronoDuration::microseconds((elapsed * 1e6) as i64)
        } else {
            self.sim_anchor
        }
    }
}

/// The mutable clock of record. Mutation is reserved to the orchestrator that
/// owns it; everything else reads through [`ClockHandle`].
#[derive(Debug)]
pub struct SimClock {
    state: Arc<RwLock<ClockState>>,
}

impl SimClock {
    /// A stopped clock at `time` with the given scale. The orchestrator
    /// resumes it when the Start phase begins.
    pub fn new(time: DateTime<Utc>, scale: f64) -> Self {
        Self {
            state: Arc::new(RwLock::new(ClockState {
                sim_anchor: time,
                wall_anchor: Instant::now(),
                scale,
                running: false,
            })),
        }
    }

    /// Authoritatively set simulated time and scale. Does not change the
    /// running flag; a running clock keeps advancing from the new anchor.
    pub fn reset(&self, time: DateTime<Utc>, scale: f64) {
        let mut state = self.state.write();
        state.sim_anchor = time;
        state.wall_anchor = Instant::now();
        state.scale = scale;
    }

    /// Un-pause elapsed-time advancement without changing the scale.
    /// Resuming a running clock is a no-op.
    pub fn resume(&self) {
        let mut state = self.state.write();
        if !state.running {
            state.wall_anchor = Instant::now();
            state.running = true;
        }
    }

    /// Freeze the clock at its current simulated time. Stopping a stopped
    /// clock is a no-op.
    pub fn stop(&self) {
        let mut state = self.state.write();
        if state.running {
            state.sim_anchor = state.now();
            state.running = false;
        }
    }

    pub fn handle(&self) -> ClockHandle {
        ClockHandle {
            state: self.state.clone(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.state.read().now()
    }

    pub fn scale(&self) -> f64 {
        self.state.read().scale
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }
}

/// Read-only view of the process clock, cheap to clone and hand to actors.
#[derive(Debug, Clone)]
pub struct ClockHandle {
    state: Arc<RwLock<ClockState>>,
}

impl ClockHandle {
    pub fn now(&self) -> DateTime<Utc> {
        self.state.read().now()
    }

    pub fn scale(&self) -> f64 {
        self.state.read().scale
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stopped_clock_is_constant() {
        let t0 = Utc::now();
        let clock = SimClock::new(t0, 8.0);
        assert!(!clock.is_running());
        let a = clock.now();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(clock.now(), a);
        assert_eq!(a, t0);
    }

    #[tokio::test]
    async fn running_clock_advances_by_scaled_wall_delta() {
        let t0 = Utc::now();
        let clock = SimClock::new(t0, 10.0);
        clock.resume();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let advanced = (clock.now() - t0).num_milliseconds();
        // 100ms wall at 10x should land near 1000ms sim, scheduler jitter aside
        assert!(advanced >= 900, "advanced only {advanced}ms");
        assert!(advanced < 3000, "advanced {advanced}ms");
    }

    #[tokio::test]
    async fn stop_freezes_and_resume_continues() {
        let t0 = Utc::now();
        let clock = SimClock::new(t0, 5.0);
        clock.resume();
        tokio::time::sleep(Duration::from_millis(50)).await;
        clock.stop();
        let frozen = clock.now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(clock.now(), frozen);

        clock.resume();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(clock.now() > frozen);
        assert_eq!(clock.scale(), 5.0);
    }

    #[test]
    fn reset_rewrites_time_and_scale() {
        let clock = SimClock::new(Utc::now(), 1.0);
        let epoch = DateTime::parse_from_rfc3339("2031-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        clock.reset(epoch, 60.0);
        assert_eq!(clock.scale(), 60.0);
        assert!(!clock.is_running());
        assert_eq!(clock.now(), epoch);
    }
}
