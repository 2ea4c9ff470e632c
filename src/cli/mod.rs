use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// List available MIDI devices
    #[arg(long)]
    pub device_list: bool,

    /// MIDI device to receive clock and transport from
    #[arg(long)]
    pub input_device: Option<String>,

    /// MIDI device to send clock, transport and markers to
    #[arg(long)]
    pub output_device: Option<String>,

    /// Choose input and output ports interactively
    #[arg(long)]
    pub pick_ports: bool,

    /// Initial tempo in BPM (20-300)
    #[arg(long)]
    pub bpm: Option<f64>,

    /// How far ahead of each downbeat the marker is sent, in milliseconds
    #[arg(long)]
    pub lead_ms: Option<f64>,

    /// Start playing immediately with the local clock as master
    #[arg(long)]
    pub master: bool,

    /// Configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Send one marker note and exit
    #[arg(long)]
    pub test_marker: bool,

    /// Log to stderr instead of the log file
    #[arg(long)]
    pub log_stderr: bool,
}

pub fn validate_device(device_name: &str, devices: &[String]) -> Result<(), String> {
    if !devices.iter().any(|d| d.contains(device_name)) {
        let mut error_msg = format!(
            "Error: Device '{}' not found in available devices:\n",
            device_name
        );
        for device in devices {
            error_msg.push_str(&format!("  - {}\n", device));
        }
        return Err(error_msg);
    }
    Ok(())
}
