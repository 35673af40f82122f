use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub fast: FastGains,
    pub slow: SlowGains,
    pub signals: FaultSignals,
    pub timing: TimingConfig,
}

/// Acquisition-phase gains. The proportional factor approximates a full
/// duty-cycle step per Hz of one-second error for the oscillator it is
/// tuned for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FastGains {
    pub p_factor: i64,
    /// Window error magnitude treated as in-band (lock candidate).
    pub error_band: i64,
    /// Window error saturation before the gain is applied
    /// (actuator range / p_factor, per window).
    pub max_error: i64,
    /// Hard clamp on a single duty-cycle step.
    pub max_adjust: i64,
    pub window_secs: i32,
    /// Samples discarded after entering acquisition, while the counters
    /// recover from the unsynchronized mode switch.
    pub settle_secs: i32,
    /// Consecutive in-band windows before handing off to tracking.
    pub lock_windows: u8,
}

/// Tracking-phase gains; the proportional factor is a few percent of the
/// acquisition one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowGains {
    pub p_factor: i64,
    pub p_error_band: i64,
    pub i_factor: i64,
    /// Run-length the integral history must exceed before the I term engages.
    pub i_error_band: i64,
    pub window_secs: i32,
    pub settle_secs: i32,
    /// Window error magnitude treated as a glitch, demoting back to
    /// acquisition.
    pub glitch_limit: i64,
}

/// Which platform fault signals are wired up on this board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultSignals {
    pub osc_cold: bool,
    pub gps_lock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    pub nominal_hz: i64,
    /// Raw accumulated ticks with no 1PPS capture before declaring the
    /// reference missing.
    pub no_pps_ticks: i64,
    /// Reference edges with no oscillator activity before declaring the
    /// oscillator clock missing.
    pub miss_limit: u32,
}

impl ControllerConfig {
    /// Gain set for the Isotemp OCXO131 oven oscillator. The fast factor was
    /// found by a binary search across the tuning range; slow is 1/50th.
    pub fn isotemp() -> Self {
        ControllerConfig {
            fast: FastGains {
                p_factor: 2500,
                error_band: 1,
                max_error: 393,
                max_adjust: 32_000,
                window_secs: 8,
                settle_secs: 5,
                lock_windows: 5,
            },
            slow: SlowGains {
                p_factor: 50,
                p_error_band: 1,
                i_factor: 25,
                i_error_band: 1,
                window_secs: 60,
                settle_secs: 2,
                glitch_limit: 128,
            },
            signals: FaultSignals {
                osc_cold: true,
                gps_lock: false,
            },
            timing: TimingConfig {
                nominal_hz: 10_000_000,
                no_pps_ticks: 15_000_000,
                miss_limit: 14,
            },
        }
    }

    /// Gain set for the Fox 801 oscillator, which tunes far more steeply
    /// per control-voltage step and carries neither fault signal.
    pub fn fox801() -> Self {
        ControllerConfig {
            fast: FastGains {
                p_factor: 284,
                error_band: 1,
                max_error: 920,
                max_adjust: 32_000,
                window_secs: 8,
                settle_secs: 5,
                lock_windows: 5,
            },
            slow: SlowGains {
                p_factor: 5,
                p_error_band: 10,
                i_factor: 1,
                i_error_band: 1,
                window_secs: 60,
                settle_secs: 2,
                glitch_limit: 128,
            },
            signals: FaultSignals {
                osc_cold: false,
                gps_lock: false,
            },
            timing: TimingConfig {
                nominal_hz: 10_000_000,
                no_pps_ticks: 15_000_000,
                miss_limit: 14,
            },
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "isotemp" => Some(Self::isotemp()),
            "fox801" => Some(Self::fox801()),
            _ => None,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::isotemp()
    }
}
