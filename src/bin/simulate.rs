//! Closed-loop bench simulation: a modeled oven oscillator and a GPS second
//! generator driving the real controller, for gain work without hardware.

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, RwLock};

use gpsdoctl::accumulator::{Timebase, WRAP};
use gpsdoctl::config::ControllerConfig;
use gpsdoctl::controller::GpsdoController;
use gpsdoctl::status::GpsdoStatus;
use gpsdoctl::traits::{Actuator, FaultInputs};

#[derive(Parser, Debug)]
#[command(author, version, about = "GPSDO control-loop simulator", long_about = None)]
struct Args {
    /// Gain/threshold preset: isotemp or fox801
    #[arg(long, default_value = "isotemp")]
    preset: String,

    /// Simulated seconds to run
    #[arg(long, default_value_t = 900)]
    seconds: u32,

    /// Oscillator frequency error at the duty-cycle midpoint, in Hz
    #[arg(long, default_value_t = 4.0, allow_hyphen_values = true)]
    midpoint_offset_hz: f64,

    /// Tuning slope in Hz per duty-cycle step
    #[arg(long, default_value_t = 0.0004)]
    slope: f64,
}

struct OcxoState {
    nominal_hz: f64,
    midpoint_offset_hz: f64,
    slope: f64,
    duty: u16,
}

/// Linear tuning model around the duty-cycle midpoint.
#[derive(Clone)]
struct OcxoModel(Rc<RefCell<OcxoState>>);

impl OcxoModel {
    fn freq_hz(&self) -> f64 {
        let st = self.0.borrow();
        st.nominal_hz + st.midpoint_offset_hz + st.slope * (st.duty as f64 - 32_768.0)
    }
}

impl Actuator for OcxoModel {
    fn set_duty(&mut self, duty: u16) -> Result<()> {
        self.0.borrow_mut().duty = duty;
        Ok(())
    }
}

struct NoFaults;

impl FaultInputs for NoFaults {
    fn osc_cold(&self) -> bool {
        false
    }
    fn gps_lock_lost(&self) -> bool {
        false
    }
}

/// Turns a frequency into the per-second hardware event stream, carrying
/// fractional ticks across seconds.
struct SecondGen {
    abs: u64,
    frac: f64,
}

impl SecondGen {
    fn new() -> Self {
        SecondGen { abs: 0, frac: 0.0 }
    }

    fn second(&mut self, tb: &Timebase, freq_hz: f64) {
        let total = self.frac + freq_hz;
        let ticks = total.floor() as u64;
        self.frac = total - ticks as f64;

        let end = self.abs + ticks;
        let mut boundary = (self.abs / WRAP as u64 + 1) * WRAP as u64;
        while boundary < end {
            tb.on_counter_wrap();
            boundary += WRAP as u64;
        }
        self.abs = end;
        tb.on_reference_edge((end % WRAP as u64) as u16);
    }
}

fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    let config = match ControllerConfig::preset(&args.preset) {
        Some(c) => c,
        None => {
            error!("unknown preset {:?} (expected isotemp or fox801)", args.preset);
            std::process::exit(1);
        }
    };
    let nominal_hz = config.timing.nominal_hz as f64;

    let model = OcxoModel(Rc::new(RefCell::new(OcxoState {
        nominal_hz,
        midpoint_offset_hz: args.midpoint_offset_hz,
        slope: args.slope,
        duty: 1,
    })));

    let timebase = Arc::new(Timebase::new());
    let status = Arc::new(RwLock::new(GpsdoStatus::default()));
    let mut controller = GpsdoController::new(
        model.clone(),
        NoFaults,
        timebase.clone(),
        status.clone(),
        config,
    );
    controller.prime()?;

    info!(
        "Simulating {}s: midpoint offset {:+.3} Hz, slope {} Hz/step",
        args.seconds, args.midpoint_offset_hz, args.slope
    );

    let mut gen = SecondGen::new();
    for sec in 1..=args.seconds {
        gen.second(&timebase, model.freq_hz());
        controller.poll()?;
        controller.poll()?;

        if sec % 60 == 0 {
            if let Ok(st) = status.read() {
                info!(
                    "t={:>5}s mode:{} duty:{:04X} werr:{}",
                    sec, st.mode, st.duty, st.window_error
                );
            }
        }
    }

    info!(
        "final: mode:{} duty:{:04X} freq error {:+.4} Hz",
        controller.mode(),
        controller.duty(),
        model.freq_hz() - nominal_hz
    );
    Ok(())
}
