//! GPSDO Controller - fault monitoring and the two-stage locking machine
//!
//! The controller runs a two-phase frequency discipline:
//! 1. **FAST (acquisition)**: proportional control over short 8 s windows,
//!    sized to cross the oscillator's whole tuning range in a few steps.
//! 2. **SLOW (tracking)**: proportional + integral control over 60 s
//!    windows, where the integral term only engages on a sustained
//!    same-direction error trend.
//!
//! In front of both sits a fault layer that keeps the loop out of the
//! control states while the hardware is unhealthy: oscillator oven cold, no
//! oscillator clock, no 1PPS from the GPS, no GPS lock. Every fault has its
//! own recovery predicate and funnels back through CHECKERRORS.

use anyhow::Result;
use log::{debug, info, warn};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::accumulator::Timebase;
use crate::config::ControllerConfig;
use crate::servo::{self, SampleWindow};
use crate::status::{GpsdoStatus, LedPattern};
use crate::traits::{Actuator, FaultInputs};

/// Controller mode. The states through `Good` run on every pass of the
/// outer loop; the states from `FastInit` on advance only when a 1PPS
/// sample arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Start,
    CheckErrors,
    OscCold,
    NoOscClock,
    NoGpsPps,
    NoGpsLock,
    Good,
    FastInit,
    FastWait,
    Fast,
    SlowInit,
    Slow,
}

impl ControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlMode::Start => "START",
            ControlMode::CheckErrors => "CHECKERRORS",
            ControlMode::OscCold => "OSCCOLD",
            ControlMode::NoOscClock => "NOOSCCLOCK",
            ControlMode::NoGpsPps => "NOGPSPPS",
            ControlMode::NoGpsLock => "NOGPSLOCK",
            ControlMode::Good => "GOOD",
            ControlMode::FastInit => "FASTINIT",
            ControlMode::FastWait => "FASTWAIT",
            ControlMode::Fast => "FAST",
            ControlMode::SlowInit => "SLOWINIT",
            ControlMode::Slow => "SLOW",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main GPSDO controller.
///
/// Owns the actuator exclusively; nothing else writes the duty cycle.
pub struct GpsdoController<A, F>
where
    A: Actuator,
    F: FaultInputs,
{
    actuator: A,
    faults: F,
    timebase: Arc<Timebase>,
    config: ControllerConfig,
    status_shared: Arc<RwLock<GpsdoStatus>>,

    mode: ControlMode,
    prev_mode: ControlMode,

    window: SampleWindow,
    /// Settle countdown while in FASTWAIT.
    fastwait_left: i32,
    /// Consecutive in-band acquisition windows.
    lock_count: u8,
    /// Integral run-length history for the tracking phase.
    ihist: i32,
    /// Tracking windows closed in a row without an adjustment.
    minutes_steady: u32,

    duty: u16,
}

impl<A, F> GpsdoController<A, F>
where
    A: Actuator,
    F: FaultInputs,
{
    pub fn new(
        actuator: A,
        faults: F,
        timebase: Arc<Timebase>,
        status_shared: Arc<RwLock<GpsdoStatus>>,
        config: ControllerConfig,
    ) -> Self {
        info!("=== GPSDO Controller Initialization ===");
        info!(
            "Fast: P={} band={} window={}s  Slow: P={} I={} window={}s",
            config.fast.p_factor,
            config.fast.error_band,
            config.fast.window_secs,
            config.slow.p_factor,
            config.slow.i_factor,
            config.slow.window_secs,
        );
        info!(
            "Signals: osc_cold={} gps_lock={}",
            config.signals.osc_cold, config.signals.gps_lock,
        );

        GpsdoController {
            actuator,
            faults,
            timebase,
            config,
            status_shared,
            mode: ControlMode::Start,
            prev_mode: ControlMode::Start,
            window: SampleWindow::new(),
            fastwait_left: 0,
            lock_count: 0,
            ihist: 0,
            minutes_steady: 0,
            duty: 1,
        }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn duty(&self) -> u16 {
        self.duty
    }

    pub fn status_shared(&self) -> Arc<RwLock<GpsdoStatus>> {
        self.status_shared.clone()
    }

    /// Drives the actuator to the starting duty cycle before the loop runs.
    pub fn prime(&mut self) -> Result<()> {
        self.actuator.set_duty(self.duty)?;
        self.publish_status();
        Ok(())
    }

    /// One pass of the outer control loop: report a mode change, run the
    /// fault layer, then consume at most one 1PPS sample.
    ///
    /// The fault pass must come first: the miss counter is the recovery
    /// predicate for NOGPSPPS/NOOSCCLOCK and consuming a nonzero sample
    /// resets it.
    pub fn poll(&mut self) -> Result<()> {
        if self.mode != self.prev_mode {
            info!("state {} -> {}", self.prev_mode, self.mode);
            self.prev_mode = self.mode;
            self.publish_status();
        }
        self.fault_pass();
        self.sample_pass()
    }

    // ========================================================================
    // FAULT LAYER - runs every pass, not gated on 1PPS
    // ========================================================================

    fn fault_pass(&mut self) {
        match self.mode {
            ControlMode::Start | ControlMode::CheckErrors => {
                // If no check fires, the pass lands in GOOD.
                self.mode = ControlMode::Good;
                self.run_checks();
            }
            ControlMode::Good => {
                // Hand off to the 1PPS-gated states.
                self.mode = ControlMode::FastInit;
            }
            ControlMode::OscCold => {
                if !self.faults.osc_cold() {
                    self.mode = ControlMode::CheckErrors;
                }
            }
            ControlMode::NoOscClock | ControlMode::NoGpsPps => {
                // Any reference edge since the state was entered clears it.
                if self.timebase.misses() != 0 {
                    self.mode = ControlMode::CheckErrors;
                }
            }
            ControlMode::NoGpsLock => {
                if !self.faults.gps_lock_lost() {
                    self.mode = ControlMode::CheckErrors;
                }
            }
            _ => self.run_checks(),
        }
    }

    /// Health checks in priority order; the first hit wins the pass.
    fn run_checks(&mut self) {
        if self.config.signals.osc_cold && self.faults.osc_cold() {
            self.mode = ControlMode::OscCold;
            return;
        }
        if self.config.signals.gps_lock && self.faults.gps_lock_lost() {
            self.mode = ControlMode::NoGpsLock;
            return;
        }
        if self.timebase.live_count() > self.config.timing.no_pps_ticks {
            self.mode = ControlMode::NoGpsPps;
            return;
        }
        if self.timebase.misses() > self.config.timing.miss_limit {
            // Reference edges keep arriving but the oscillator never ticks.
            self.mode = ControlMode::NoOscClock;
            self.timebase.clear_misses();
        }
    }

    // ========================================================================
    // SAMPLE PATH - one 1PPS sample per pass at most
    // ========================================================================

    fn sample_pass(&mut self) -> Result<()> {
        let sample = match self.timebase.take_sample() {
            Some(s) => s,
            None => return Ok(()),
        };
        if sample == 0 {
            // A reference edge with no oscillator ticks behind it: it feeds
            // the miss tracking, nothing for the control states to chew on.
            return Ok(());
        }

        let second_error = self.config.timing.nominal_hz - sample;
        debug!("1s err:{}", second_error);
        if let Ok(mut st) = self.status_shared.write() {
            st.second_error = second_error;
            st.led = LedPattern::for_mode(self.mode);
            st.updated_ts = unix_now();
        }

        self.window.accept(sample);
        self.on_sample()
    }

    fn on_sample(&mut self) -> Result<()> {
        match self.mode {
            ControlMode::FastInit => {
                // The switch into acquisition is not synchronized with 1PPS,
                // so the first captures may span a partial second; sit out a
                // few samples before trusting them.
                self.fastwait_left = self.config.fast.settle_secs;
                self.lock_count = 0;
                self.mode = ControlMode::FastWait;
            }
            ControlMode::FastWait => {
                self.fastwait_left -= 1;
                if self.fastwait_left <= 0 {
                    self.window.restart(0);
                    self.mode = ControlMode::Fast;
                }
            }
            ControlMode::Fast => return self.fast_window(),
            ControlMode::SlowInit => {
                self.minutes_steady = 0;
                self.ihist = 0;
                self.window.restart(self.config.slow.settle_secs);
                self.mode = ControlMode::Slow;
                // Same-edge handoff: this sample already advances tracking.
                return self.slow_window();
            }
            ControlMode::Slow => return self.slow_window(),
            _ => {}
        }
        Ok(())
    }

    fn fast_window(&mut self) -> Result<()> {
        let g = self.config.fast.clone();
        let sum = match self.window.advance(g.window_secs) {
            Some(s) => s,
            None => return Ok(()),
        };

        let error = servo::window_error(self.config.timing.nominal_hz, g.window_secs, sum);
        let mut adjust = 0;
        if error.abs() <= g.error_band {
            self.lock_count += 1;
            if self.lock_count >= g.lock_windows {
                // Holding within the band long enough; hand off to tracking.
                self.mode = ControlMode::SlowInit;
            }
        } else {
            self.lock_count = 0;
            adjust = servo::fast_adjust(error, &g);
        }

        self.duty = servo::apply_adjust(self.duty, adjust);
        info!("[FAST] duty:{:04X} err:{} adj:{}", self.duty, error, adjust);
        self.record_window(error, 0, 0, adjust);

        if adjust != 0 {
            self.actuator.set_duty(self.duty)?;
            self.window.hold_off();
        }
        Ok(())
    }

    fn slow_window(&mut self) -> Result<()> {
        let g = self.config.slow.clone();
        let sum = match self.window.advance(g.window_secs) {
            Some(s) => s,
            None => return Ok(()),
        };

        let error = servo::window_error(self.config.timing.nominal_hz, g.window_secs, sum);
        if error.abs() > g.glitch_limit {
            // Glitch or real drift beyond what tracking can absorb;
            // reacquire from scratch.
            warn!("[SLOW] gross err:{} reacquiring", error);
            self.mode = ControlMode::FastInit;
            self.record_window(error, 0, 0, 0);
            return Ok(());
        }

        let terms = servo::slow_adjust(error, &mut self.ihist, &g);
        if terms.adjust != 0 {
            self.minutes_steady = 0;
        } else {
            self.minutes_steady += 1;
        }

        self.duty = servo::apply_adjust(self.duty, terms.adjust);
        info!(
            "[SLOW] err:{} P:{} I:{} Ihist:{} adj:{} duty:{:04X}",
            error, terms.p, terms.i, self.ihist, terms.adjust, self.duty
        );
        self.record_window(error, terms.p, terms.i, terms.adjust);

        if terms.adjust != 0 {
            self.actuator.set_duty(self.duty)?;
            self.window.hold_off();
        }
        Ok(())
    }

    // ========================================================================
    // STATUS PUBLISHING
    // ========================================================================

    fn publish_status(&self) {
        if let Ok(mut st) = self.status_shared.write() {
            st.mode = self.mode.as_str().to_string();
            st.duty = self.duty;
            st.locked = matches!(self.mode, ControlMode::SlowInit | ControlMode::Slow);
            st.minutes_steady = self.minutes_steady;
            st.led = LedPattern::for_mode(self.mode);
            st.updated_ts = unix_now();
        }
    }

    fn record_window(&self, error: i64, p: i64, i: i64, adjust: i64) {
        if let Ok(mut st) = self.status_shared.write() {
            st.mode = self.mode.as_str().to_string();
            st.duty = self.duty;
            st.window_error = error;
            st.p = p;
            st.i = i;
            st.ihist = self.ihist;
            st.adjust = adjust;
            st.locked = matches!(self.mode, ControlMode::SlowInit | ControlMode::Slow);
            st.minutes_steady = self.minutes_steady;
            st.led = LedPattern::for_mode(self.mode);
            st.updated_ts = unix_now();
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ============================================================================
// TESTS
// ============================================================================
