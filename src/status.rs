use serde::{Deserialize, Serialize};

use crate::controller::ControlMode;

/// Controller status shared with external tooling (status file, front-panel
/// renderer, tests).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GpsdoStatus {
    /// Current controller mode name.
    pub mode: String,

    /// PWM duty cycle currently driving the control voltage.
    pub duty: u16,

    /// Raw error of the most recent one-second sample.
    pub second_error: i64,

    /// Error of the most recently closed window.
    pub window_error: i64,

    /// P/I breakdown of the last closed tracking window.
    pub p: i64,
    pub i: i64,
    pub ihist: i32,

    /// Adjustment applied at the last window close (zero = holding).
    pub adjust: i64,

    /// True once the loop has handed off to the tracking phase.
    pub locked: bool,

    /// Tracking windows closed in a row without an adjustment.
    pub minutes_steady: u32,

    /// Front-panel pattern for the current mode.
    pub led: LedPattern,

    /// Unix timestamp of last status update.
    pub updated_ts: u64,
}

impl Default for GpsdoStatus {
    fn default() -> Self {
        GpsdoStatus {
            mode: "START".to_string(),
            duty: 1,
            second_error: 0,
            window_error: 0,
            p: 0,
            i: 0,
            ihist: 0,
            adjust: 0,
            locked: false,
            minutes_steady: 0,
            led: LedPattern::OFF,
            updated_ts: 0,
        }
    }
}

/// One LED's drive state; blink periods are in reference edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Blink {
    Off,
    On,
    Every(u8),
}

/// Front-panel pattern. Blue reports oven/oscillator health, yellow the
/// reference and acquisition state, green tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedPattern {
    pub blue: Blink,
    pub green: Blink,
    pub yellow: Blink,
}

impl LedPattern {
    pub const OFF: LedPattern = LedPattern {
        blue: Blink::Off,
        green: Blink::Off,
        yellow: Blink::Off,
    };

    /// Pattern for a controller mode. Pure; the caller re-renders it on
    /// every pass.
    pub fn for_mode(mode: ControlMode) -> LedPattern {
        match mode {
            ControlMode::Start | ControlMode::CheckErrors | ControlMode::Good => Self::OFF,
            ControlMode::OscCold => LedPattern {
                blue: Blink::On,
                ..Self::OFF
            },
            ControlMode::NoOscClock => LedPattern {
                blue: Blink::Every(1),
                ..Self::OFF
            },
            ControlMode::NoGpsPps => LedPattern {
                yellow: Blink::Every(3),
                ..Self::OFF
            },
            ControlMode::NoGpsLock => LedPattern {
                yellow: Blink::Every(5),
                ..Self::OFF
            },
            ControlMode::FastInit | ControlMode::FastWait | ControlMode::Fast => LedPattern {
                yellow: Blink::Every(1),
                ..Self::OFF
            },
            ControlMode::SlowInit => LedPattern {
                green: Blink::Every(1),
                ..Self::OFF
            },
            ControlMode::Slow => LedPattern {
                green: Blink::On,
                ..Self::OFF
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_default() {
        let status = GpsdoStatus::default();
        assert_eq!(status.mode, "START");
        assert_eq!(status.duty, 1);
        assert!(!status.locked);
        assert_eq!(status.led, LedPattern::OFF);
    }

    #[test]
    fn test_status_serde_roundtrip() {
        let mut status = GpsdoStatus::default();
        status.mode = "SLOW".to_string();
        status.duty = 0x8123;
        status.locked = true;
        status.ihist = -3;
        status.led = LedPattern::for_mode(ControlMode::Slow);

        let json = serde_json::to_string(&status).expect("serialize failed");
        let restored: GpsdoStatus = serde_json::from_str(&json).expect("deserialize failed");

        assert_eq!(restored.mode, "SLOW");
        assert_eq!(restored.duty, 0x8123);
        assert!(restored.locked);
        assert_eq!(restored.ihist, -3);
        assert_eq!(restored.led.green, Blink::On);
    }

    #[test]
    fn test_led_pattern_faults() {
        assert_eq!(
            LedPattern::for_mode(ControlMode::OscCold),
            LedPattern { blue: Blink::On, green: Blink::Off, yellow: Blink::Off }
        );
        assert_eq!(
            LedPattern::for_mode(ControlMode::NoOscClock).blue,
            Blink::Every(1)
        );
        assert_eq!(
            LedPattern::for_mode(ControlMode::NoGpsPps).yellow,
            Blink::Every(3)
        );
        assert_eq!(
            LedPattern::for_mode(ControlMode::NoGpsLock).yellow,
            Blink::Every(5)
        );
    }

    #[test]
    fn test_led_pattern_operating() {
        for mode in [ControlMode::FastInit, ControlMode::FastWait, ControlMode::Fast] {
            assert_eq!(LedPattern::for_mode(mode).yellow, Blink::Every(1));
            assert_eq!(LedPattern::for_mode(mode).green, Blink::Off);
        }
        assert_eq!(LedPattern::for_mode(ControlMode::Slow).green, Blink::On);
        assert_eq!(LedPattern::for_mode(ControlMode::Good), LedPattern::OFF);
    }
}
