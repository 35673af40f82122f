use anyhow::Result;

/// Control-voltage actuator: a 16-bit PWM duty cycle, low-pass filtered into
/// the oscillator's tuning input. Higher duty cycle moves the frequency in
/// one fixed direction; polarity is a wiring property.
#[cfg_attr(test, mockall::automock)]
pub trait Actuator {
    fn set_duty(&mut self, duty: u16) -> Result<()>;
}

/// Digital health signals from the platform. Either signal may be absent on
/// a given board; `ControllerConfig::signals` gates whether it is consulted.
#[cfg_attr(test, mockall::automock)]
pub trait FaultInputs {
    /// High while the oscillator oven is still warming up.
    fn osc_cold(&self) -> bool;
    /// High while the GPS receiver reports no lock.
    fn gps_lock_lost(&self) -> bool;
}
