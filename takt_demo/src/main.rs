//! # Takt Demo
//!
//! A supervised drive: an angle setpoint chain runs in a 1 ms time domain
//! while the safety system watches the emergency stop and the supply
//! voltage. A startup sequence waits for a healthy supply, then lifts the
//! machine into `operational`. Ctrl-C stops the executor at the next tick
//! boundary.
//!
//! # Usage
//!
//! ```bash
//! # Run with the built-in simulated I/O
//! takt_demo
//!
//! # Run against an I/O description file
//! takt_demo --hal-config config/io.toml -v
//! ```

#![deny(warnings)]

use std::f64::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use takt_core::control::blocks::{Constant, Gain, Sum, WrapAround};
use takt_core::control::{Block, BlockError, Input, InputPort, TimeDomain};
use takt_core::hal::{AnalogOutput, Hal};
use takt_core::task::{Executor, Periodic, shutdown};
use takt_core::time::Timestamp;
use takt_safety::{
    EventVisibility, InputAction, OutputAction, SafetyProperties, SafetySystem,
};
use takt_sequencer::{Sequence, Sequencer, StepResult};

/// Control period [s].
const PERIOD: f64 = 0.001;

/// Simulated I/O used when no config file is given.
const DEFAULT_IO: &str = r#"
[[logic_input]]
name = "emergency_stop"
initial = false

[[logic_output]]
name = "motor_power"

[[analog_input]]
name = "supply_voltage"
initial = 24.0

[[analog_output]]
name = "drive_command"
"#;

/// takt demo - supervised drive with safety walk and startup sequence
#[derive(Parser, Debug)]
#[command(name = "takt_demo")]
#[command(version)]
#[command(about = "Supervised drive demo for the takt framework")]
struct Args {
    /// Path to the HAL I/O configuration file.
    #[arg(short = 'c', long = "hal-config")]
    hal_config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Terminal block writing the commanded value to the drive.
struct DriveOutput {
    name: String,
    input: Input<f64>,
    drive: AnalogOutput,
}

impl DriveOutput {
    fn new(name: impl Into<String>, drive: AnalogOutput) -> Self {
        Self {
            name: name.into(),
            input: Input::new(),
            drive,
        }
    }
}

impl Block for DriveOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&mut self) -> Vec<&mut dyn InputPort> {
        vec![&mut self.input]
    }

    fn run(&mut self, _now: Timestamp) -> Result<(), BlockError> {
        let sig = self
            .input
            .signal()
            .ok_or_else(|| BlockError::unconnected(&self.name, "in"))?;
        self.drive.write(sig.value);
        Ok(())
    }
}

/// The demo block diagram: setpoint + trim → wrap → gain → drive.
struct ControlSystem {
    setpoint: Arc<Mutex<Constant<f64>>>,
    wrap: Arc<Mutex<WrapAround>>,
    domain: Arc<Mutex<TimeDomain>>,
}

impl ControlSystem {
    fn new(hal: &Hal) -> Result<Self, Box<dyn std::error::Error>> {
        let setpoint = Arc::new(Mutex::new(Constant::new("setpoint", 4.0)));
        let trim = Arc::new(Mutex::new(Constant::new("trim", 0.25)));
        let target = Arc::new(Mutex::new(Sum::<2, f64>::new("target")));
        let wrap = Arc::new(Mutex::new(WrapAround::new("wrap", -PI, PI)));
        let gain = Arc::new(Mutex::new(Gain::new("drive_gain", 0.5)));
        let drive = Arc::new(Mutex::new(DriveOutput::new(
            "drive",
            hal.analog_output("drive_command")?,
        )));

        {
            let mut target_guard = target.lock();
            target_guard.input(0)?.connect(setpoint.lock().out())?;
            target_guard.input(1)?.connect(trim.lock().out())?;
        }
        wrap.lock().input().connect(target.lock().out())?;
        wrap.lock().out().set_name("wrapped angle");
        gain.lock().input().connect(wrap.lock().out())?;
        drive.lock().input.connect(gain.lock().out())?;

        let domain = Arc::new(Mutex::new(TimeDomain::new("motion", PERIOD)));
        {
            let mut td = domain.lock();
            td.add(setpoint.clone())?;
            td.add(trim)?;
            td.add(target)?;
            td.add(wrap.clone())?;
            td.add(gain)?;
            td.add(drive)?;
        }
        Ok(Self {
            setpoint,
            wrap,
            domain,
        })
    }
}

fn main() {
    if let Err(e) = run() {
        error!("takt demo failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(&args);
    shutdown::install_sigint_handler()?;

    info!("takt demo v{} starting...", env!("CARGO_PKG_VERSION"));

    let hal = match &args.hal_config {
        Some(path) => Hal::from_file(path)?,
        None => Hal::from_toml(DEFAULT_IO)?,
    };

    let control = ControlSystem::new(&hal)?;

    // ── Safety state machine ────────────────────────────────────────
    let mut props = SafetyProperties::new();
    let sl_off = props.level("off");
    let sl_operational = props.level("operational");
    let se_startup = props.event("startup done");
    let se_estop = props.event("emergency stop");
    let fault = props.fault_event();
    props.transition(sl_off, &se_startup, sl_operational, EventVisibility::Public);
    props.transition(sl_operational, &se_estop, sl_off, EventVisibility::Private);
    props.transition(sl_operational, &fault, sl_off, EventVisibility::Private);

    let emergency = hal.logic_input("emergency_stop", false)?;
    let supply = hal.analog_input("supply_voltage")?;
    props.critical_input(emergency.clone());
    props.critical_analog_input(supply.clone());
    props.input_action(
        sl_operational,
        InputAction::check(emergency, true, &se_estop),
    );
    props.input_action(
        sl_operational,
        InputAction::range(supply.clone(), 18.0, 30.0, &se_estop),
    );
    props.output_action(
        sl_off,
        OutputAction::set(hal.logic_output("motor_power", false)?, false),
    );
    props.output_action(
        sl_off,
        OutputAction::set_analog(hal.analog_output("drive_command")?, 0.0),
    );
    props.output_action(
        sl_operational,
        OutputAction::set(hal.logic_output("motor_power", false)?, true),
    );
    props.add_domain(sl_operational, control.domain.clone());
    props.on_entry(sl_off, || info!("drive disabled"));
    props.on_entry(sl_operational, || info!("drive enabled"));
    props.set_entry_level(sl_off);

    let system = SafetySystem::new(props, PERIOD)?;
    let safety = system.handle();

    // ── Startup sequence ────────────────────────────────────────────
    let mut startup = Sequence::new("startup");
    startup.step("Init", |_| StepResult::Next);
    startup.step("WaitForSupply", {
        let supply = supply.clone();
        move |_| {
            if (18.0..=30.0).contains(&supply.read()) {
                StepResult::Next
            } else {
                std::thread::sleep(Duration::from_millis(10));
                StepResult::Goto("WaitForSupply")
            }
        }
    });
    startup.step("Start", {
        let safety = safety.clone();
        move |_| {
            if let Err(e) = safety.trigger_event(&se_startup) {
                error!("startup event rejected: {e}");
            }
            StepResult::Done
        }
    });
    let mut sequencer = Sequencer::new("main");

    // ── Executor ────────────────────────────────────────────────────
    let mut executor = Executor::new();
    executor.set_main_task(system);

    let mut telemetry = Periodic::callable("telemetry", 0.5, {
        let wrap = control.wrap.clone();
        let safety = safety.clone();
        move |_| {
            let angle = wrap.lock().out().signal();
            info!(
                level = %safety.current_level_name(),
                angle = angle.value,
                "telemetry"
            );
        }
    });
    telemetry.add_monitor(|stats| {
        if stats.run_count % 120 == 0 {
            info!(avg_ns = stats.avg_ns(), "telemetry task timing");
        }
    });
    executor.add(telemetry)?;

    // Slow setpoint drift to keep the wrap block busy.
    executor.add(Periodic::callable("setpoint drift", 0.1, {
        let setpoint = control.setpoint.clone();
        let mut angle = 4.0;
        move |_| {
            angle += 0.05;
            setpoint.lock().set(angle);
        }
    }))?;

    sequencer.start(startup);
    let result = executor.run();
    sequencer.abort();

    info!("takt demo finished");
    result.map_err(Into::into)
}

fn setup_tracing(args: &Args) {
    let default_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
