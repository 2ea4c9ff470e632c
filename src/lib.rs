pub mod cli;
pub mod config;
pub mod control;
pub mod logging;
pub mod midi;
pub mod sync;
pub mod ui;

pub use cli::Args;
pub use config::{Settings, SettingsError};
pub use sync::{SyncController, SyncEvent, SyncSettings, SyncSnapshot, TransportState};

/// Names of all MIDI ports, inputs and outputs
pub fn handle_device_list() -> Vec<String> {
    midi::list_devices()
}
