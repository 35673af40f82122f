//! Linux platform backends: sysfs PWM actuator and sysfs GPIO fault inputs.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;

use crate::traits::{Actuator, FaultInputs};

/// Control-voltage output through a sysfs PWM channel
/// (e.g. `/sys/class/pwm/pwmchip0/pwm0`).
///
/// The 16-bit duty cycle maps linearly onto the channel period; the channel
/// must already be exported (udev rule or boot script).
pub struct SysfsPwm {
    duty_path: PathBuf,
    period_ns: u32,
}

impl SysfsPwm {
    pub fn attach(channel_dir: &Path, period_ns: u32) -> Result<Self> {
        let write = |name: &str, value: String| -> Result<()> {
            let path = channel_dir.join(name);
            fs::write(&path, value).with_context(|| format!("writing {}", path.display()))
        };
        write("period", period_ns.to_string())?;
        write("enable", "1".to_string())?;
        Ok(SysfsPwm {
            duty_path: channel_dir.join("duty_cycle"),
            period_ns,
        })
    }

    fn duty_to_ns(duty: u16, period_ns: u32) -> u32 {
        (duty as u64 * period_ns as u64 / u16::MAX as u64) as u32
    }
}

impl Actuator for SysfsPwm {
    fn set_duty(&mut self, duty: u16) -> Result<()> {
        let ns = Self::duty_to_ns(duty, self.period_ns);
        debug!("pwm duty {:04X} -> {}ns", duty, ns);
        fs::write(&self.duty_path, ns.to_string())
            .with_context(|| format!("writing {}", self.duty_path.display()))
    }
}

/// Fault signals read from sysfs GPIO value files. Both signals are
/// active-high, matching the board wiring: high means cold / no lock.
/// A pin that is not wired up reads as healthy.
pub struct GpioFaultPins {
    osc_cold: Option<PathBuf>,
    gps_lock: Option<PathBuf>,
}

impl GpioFaultPins {
    pub fn new(osc_cold: Option<PathBuf>, gps_lock: Option<PathBuf>) -> Self {
        GpioFaultPins { osc_cold, gps_lock }
    }

    fn read_high(path: &Path) -> bool {
        match fs::read_to_string(path) {
            Ok(s) => s.trim() == "1",
            Err(e) => {
                // An unreadable pin must not take the loop down; treat it
                // as deasserted.
                debug!("gpio read {} failed: {}", path.display(), e);
                false
            }
        }
    }
}

impl FaultInputs for GpioFaultPins {
    fn osc_cold(&self) -> bool {
        self.osc_cold.as_deref().map(Self::read_high).unwrap_or(false)
    }

    fn gps_lock_lost(&self) -> bool {
        self.gps_lock.as_deref().map(Self::read_high).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duty_scaling() {
        assert_eq!(SysfsPwm::duty_to_ns(0, 40_000), 0);
        assert_eq!(SysfsPwm::duty_to_ns(u16::MAX, 40_000), 40_000);
        // Midpoint lands on (almost exactly) half the period.
        let mid = SysfsPwm::duty_to_ns(0x8000, 40_000);
        assert!((19_999..=20_001).contains(&mid), "mid {}", mid);
        // Monotonic across the range.
        assert!(SysfsPwm::duty_to_ns(1000, 40_000) <= SysfsPwm::duty_to_ns(1001, 40_000));
        assert!(SysfsPwm::duty_to_ns(1000, 40_000) < SysfsPwm::duty_to_ns(2000, 40_000));
    }

    #[test]
    fn test_pwm_attach_and_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let channel = dir.path();
        fs::write(channel.join("period"), "0").unwrap();
        fs::write(channel.join("enable"), "0").unwrap();
        fs::write(channel.join("duty_cycle"), "0").unwrap();

        let mut pwm = SysfsPwm::attach(channel, 40_000).expect("attach");
        assert_eq!(fs::read_to_string(channel.join("period")).unwrap(), "40000");
        assert_eq!(fs::read_to_string(channel.join("enable")).unwrap(), "1");

        pwm.set_duty(u16::MAX).expect("set_duty");
        assert_eq!(
            fs::read_to_string(channel.join("duty_cycle")).unwrap(),
            "40000"
        );
    }

    #[test]
    fn test_pwm_attach_fails_without_channel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("pwm9");
        assert!(SysfsPwm::attach(&missing, 40_000).is_err());
    }

    #[test]
    fn test_gpio_fault_reads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cold = dir.path().join("cold_value");
        let lock = dir.path().join("lock_value");
        fs::write(&cold, "1\n").unwrap();
        fs::write(&lock, "0\n").unwrap();

        let pins = GpioFaultPins::new(Some(cold.clone()), Some(lock));
        assert!(pins.osc_cold());
        assert!(!pins.gps_lock_lost());

        fs::write(&cold, "0\n").unwrap();
        assert!(!pins.osc_cold());
    }

    #[test]
    fn test_gpio_unwired_pins_read_healthy() {
        let pins = GpioFaultPins::new(None, None);
        assert!(!pins.osc_cold());
        assert!(!pins.gps_lock_lost());

        let gone = GpioFaultPins::new(Some(PathBuf::from("/nonexistent/value")), None);
        assert!(!gone.osc_cold());
    }
}
