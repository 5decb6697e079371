use crate::config::Config;
use crate::exam::DeviceCheck;
use crate::media::{self, MediaTrackStatus, PreviewSurface};
use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "exam-studio")]
#[command(about = "Guided pronunciation exam with timed recording sessions", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print version information
    Version,
    /// Check that the camera and microphone are ready
    Devices(DevicesCliArgs),
}

#[derive(ClapArgs, Debug)]
pub struct DevicesCliArgs {
    /// Device backend to check (default: from config)
    #[arg(long)]
    pub backend: Option<String>,
}

pub async fn handle_devices_command(args: DevicesCliArgs) -> Result<()> {
    let config = Config::load()?;
    let backend = args.backend.unwrap_or(config.devices.backend.clone());
    let devices = media::backend_from_name(&backend)?;

    let mut check = DeviceCheck::new(devices, PreviewSurface::new(), config.devices.health_poll());
    let result = check.acquire().await;
    check.release();

    match result {
        Ok(readiness) => {
            print_readiness(&backend, readiness);
            if !readiness.all_ready() {
                println!();
                println!("The exam cannot start until both are ON.");
            }
        }
        Err(e) => {
            println!("Device check failed on {} backend: {}", backend, e);
        }
    }

    Ok(())
}

fn print_readiness(backend: &str, readiness: MediaTrackStatus) {
    let on_off = |ready: bool| if ready { "ON" } else { "OFF" };
    println!("Backend: {}", backend);
    println!("  CAMERA: {}", on_off(readiness.video_ready));
    println!("  MIC:    {}", on_off(readiness.audio_ready));
}
