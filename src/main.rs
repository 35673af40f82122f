use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use gpsdoctl::config::ControllerConfig;
use gpsdoctl::status::GpsdoStatus;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gain/threshold preset: isotemp or fox801
    #[arg(long, default_value = "isotemp")]
    preset: String,

    /// Serial device streaming counter wrap/edge records
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    counter_dev: PathBuf,

    /// Exported sysfs PWM channel driving the control voltage
    #[arg(long, default_value = "/sys/class/pwm/pwmchip0/pwm0")]
    pwm_channel: PathBuf,

    /// PWM period in nanoseconds
    #[arg(long, default_value_t = 40_000)]
    pwm_period_ns: u32,

    /// GPIO value file for the oscillator-cold signal
    #[arg(long)]
    osc_cold_gpio: Option<PathBuf>,

    /// GPIO value file for the GPS lock-lost signal
    #[arg(long)]
    gps_lock_gpio: Option<PathBuf>,

    /// Write controller status as JSON to this path every few seconds
    #[arg(long)]
    status_file: Option<PathBuf>,
}

fn enable_realtime_priority() {
    #[cfg(unix)]
    unsafe {
        let param = libc::sched_param { sched_priority: 50 };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) == 0 {
            info!("Realtime priority (SCHED_FIFO, 50) enabled.");
        } else {
            warn!(
                "Failed to set realtime priority: {}. Timing jitter may suffer.",
                std::io::Error::last_os_error()
            );
        }
    }
}

/// Opens the counter frontend. When the device is a tty it is switched to
/// raw 115200 so the record stream arrives unmangled; a plain file or fifo
/// (bench replay) is read as-is.
#[cfg(unix)]
fn open_counter_port(path: &Path) -> Result<std::fs::File> {
    use anyhow::Context;
    use log::debug;
    use nix::sys::termios::{self, BaudRate, SetArg};

    let file = std::fs::OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("opening counter device {}", path.display()))?;

    match termios::tcgetattr(&file) {
        Ok(mut tio) => {
            termios::cfmakeraw(&mut tio);
            termios::cfsetspeed(&mut tio, BaudRate::B115200)?;
            termios::tcsetattr(&file, SetArg::TCSANOW, &tio)?;
        }
        Err(_) => debug!("{} is not a tty, skipping termios setup", path.display()),
    }
    Ok(file)
}

fn dump_status(path: &Path, status: &Arc<RwLock<GpsdoStatus>>) {
    let snapshot = match status.read() {
        Ok(st) => st.clone(),
        Err(_) => return,
    };
    match serde_json::to_string(&snapshot) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("status write failed: {}", e);
            }
        }
        Err(e) => warn!("status encode failed: {}", e),
    }
}

#[cfg(unix)]
fn run(args: Args, config: ControllerConfig, running: Arc<AtomicBool>) -> Result<()> {
    use anyhow::Context;
    use gpsdoctl::accumulator::Timebase;
    use gpsdoctl::controller::GpsdoController;
    use gpsdoctl::frontend::FrontendPump;
    use gpsdoctl::hw::linux::{GpioFaultPins, SysfsPwm};
    use std::thread;
    use std::time::{Duration, Instant};

    let timebase = Arc::new(Timebase::new());
    let status = Arc::new(RwLock::new(GpsdoStatus::default()));

    let port = open_counter_port(&args.counter_dev)?;
    let actuator = SysfsPwm::attach(&args.pwm_channel, args.pwm_period_ns)
        .context("attaching PWM actuator")?;
    let faults = GpioFaultPins::new(args.osc_cold_gpio.clone(), args.gps_lock_gpio.clone());
    info!(
        "Counter on {}, PWM on {}",
        args.counter_dev.display(),
        args.pwm_channel.display()
    );

    let pump = FrontendPump::new(port, timebase.clone());
    let pump_running = running.clone();
    thread::spawn(move || {
        if let Err(e) = pump.run(&pump_running) {
            error!("counter frontend stopped: {:#}", e);
            pump_running.store(false, Ordering::SeqCst);
        }
    });

    let mut controller = GpsdoController::new(actuator, faults, timebase, status.clone(), config);
    controller.prime()?;

    let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]);

    info!("Starting control loop...");
    let mut last_dump = Instant::now();
    while running.load(Ordering::SeqCst) {
        if let Err(e) = controller.poll() {
            warn!("Error in loop: {}", e);
        }

        if last_dump.elapsed() >= Duration::from_secs(5) {
            if let Some(path) = &args.status_file {
                dump_status(path, &status);
            }
            last_dump = Instant::now();
        }

        thread::sleep(Duration::from_millis(1));
    }

    info!("Exiting.");
    Ok(())
}

#[cfg(not(unix))]
fn run(_args: Args, _config: ControllerConfig, _running: Arc<AtomicBool>) -> Result<()> {
    anyhow::bail!("the hardware backends are unix-only; use gpsdosim for bench runs")
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
            error!(
                "unknown preset {:?} (expected isotemp or fox801)",
                args.preset
            );
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received. Shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    enable_realtime_priority();

    run(args, config, running)
}
