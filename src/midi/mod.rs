//! MIDI transport for barsyncrs
//!
//! This module is the boundary between the sync engine and the outside world:
//! - Core MIDI message types, wire encoding and error handling
//! - Real MIDI device communication via midir
//! - Mock implementations for testing
//! - The input loop that feeds received messages into a [`SyncController`]
//!
//! [`SyncController`]: crate::sync::SyncController
mod engine;
mod input;
pub mod midir_engine;
pub mod mock_engine;

pub use engine::{MidiEngine, MidiError, MidiMessage, Result, TimedMessage, MAX_SONG_POSITION};
pub use input::{dispatch_message, run_midi_input, INACTIVITY_TIMEOUT};
pub use midir_engine::{input_ports, list_devices, output_ports, MidirEngine};
pub use mock_engine::{MockMidiEngine, SentMessages};

pub type DefaultMidiEngine = MidirEngine;
