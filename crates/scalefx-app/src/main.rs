//! Process entry point: loads configuration, wires up hardware
//! substrates, starts the supervisor, and waits for a termination
//! signal.

use clap::Parser;
use scalefx_core::{AudioBackend, Config, Supervisor};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "scalefx", about = "Scale-model effects rig controller")]
struct Cli {
    /// Path to the YAML configuration document.
    config_path: std::path::PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "fatal startup error");
            std::process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(&cli.config_path)?;

    let gpio = match rppal::gpio::Gpio::new() {
        Ok(gpio) => Some(gpio),
        Err(e) => {
            tracing::warn!(error = %e, "no GPIO substrate on this host, PWM inputs will be unavailable");
            None
        }
    };

    let supervisor = Supervisor::start(config, gpio, AudioBackend::Auto)?;
    let run_flag = supervisor.run_flag();
    register_signal_handlers(run_flag.clone())?;

    tracing::info!("scalefx running, press Ctrl-C to stop");
    while run_flag.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_secs(1));
    }

    tracing::info!("shutting down");
    supervisor.shutdown();
    Ok(())
}

fn load_config(path: &std::path::Path) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    let config: Config = serde_yaml::from_str(&text)
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
    Ok(config)
}

fn register_signal_handlers(run_flag: Arc<std::sync::atomic::AtomicBool>) -> anyhow::Result<()> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        let flag = run_flag.clone();
        unsafe {
            signal_hook::low_level::register(signal, move || {
                flag.store(false, Ordering::Release);
            })?;
        }
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
