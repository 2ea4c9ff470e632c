//! MIDI Clock synchronization engine
//!
//! Position tracking, tempo estimation, whole-note boundary detection with
//! predictive emission, and reconciliation of transport commands, all behind
//! [`SyncController`].
pub mod boundary;
mod controller;
mod events;
pub mod generator;
pub mod position;
pub mod reconcile;
mod state;
pub mod tempo;

pub use controller::{Marker, SyncController, SyncSettings, SyncSnapshot};
pub use events::{EventBus, SyncEvent};
pub use generator::{pulse_interval, ManualPulseTimer, PulseTimer, ThreadPulseTimer};
pub use position::Position;
pub use reconcile::{is_backward_seek, reconcile, PositionUpdate, Reconciliation};
pub use state::{Mode, SyncState, TransportState};
pub use tempo::TempoEstimator;
