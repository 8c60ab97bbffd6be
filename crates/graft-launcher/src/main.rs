use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use graft_core::{InjectOutcome, InjectorConfig, inject};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graft")]
#[command(about = "Launches a host process and loads the graft payload into it")]
struct Args {
    /// Host executable. Defaults to hammer.exe next to the launcher.
    host: Option<PathBuf>,

    /// Payload library to load into the host. Defaults to
    /// graft_payload.dll next to the launcher.
    #[arg(short, long)]
    payload: Option<PathBuf>,

    /// Seconds to let the host settle before injecting.
    #[arg(short, long, default_value_t = 3)]
    wait_secs: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let launcher_dir = launcher_dir()?;

    let config = InjectorConfig {
        host_exe: args.host.unwrap_or_else(|| launcher_dir.join("hammer.exe")),
        payload: args
            .payload
            .unwrap_or_else(|| launcher_dir.join("graft_payload.dll")),
        ready_wait: Duration::from_secs(args.wait_secs),
    };

    info!(
        "Injecting {} into {}",
        config.payload.display(),
        config.host_exe.display()
    );

    match inject(&config) {
        Ok(InjectOutcome::Loaded) => {
            info!("Payload loaded; the host is on its own now");
            Ok(())
        }
        Ok(InjectOutcome::TargetExited) => {
            info!("Host exited before injection; nothing to do");
            Ok(())
        }
        Err(e) => {
            error!("Injection failed: {e}");
            Err(e.into())
        }
    }
}

fn launcher_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".")))
}
