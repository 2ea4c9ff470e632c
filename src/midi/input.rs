use super::{MidiMessage, TimedMessage};
use crate::config::POSITION_UNITS_PER_QUARTER_NOTE;
use crate::sync::SyncController;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use log::{info, trace, warn};
use std::sync::Arc;
use std::time::Duration;

/// Silence on the input after which a warning is logged
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Routes one received message to the controller
pub fn dispatch_message(controller: &SyncController, timed: TimedMessage) {
    match timed.message {
        MidiMessage::Clock => controller.handle_pulse_at(timed.received_at),
        MidiMessage::Start => controller.handle_transport_start(),
        MidiMessage::Stop => controller.handle_transport_stop(),
        MidiMessage::Continue => controller.handle_transport_continue(),
        MidiMessage::SongPositionPointer { position } => controller.handle_position_jump(
            i64::from(position),
            f64::from(position) / POSITION_UNITS_PER_QUARTER_NOTE as f64,
        ),
        other => trace!("Ignoring incoming {:?}", other),
    }
}

/// Feeds received messages into the controller until every sender is gone.
/// Blocks the calling thread.
pub fn run_midi_input(rx: Receiver<TimedMessage>, controller: Arc<SyncController>) {
    info!("MIDI input loop started");
    let mut warned = false;

    loop {
        match rx.recv_timeout(INACTIVITY_TIMEOUT) {
            Ok(timed) => {
                if warned {
                    info!("MIDI input resumed");
                    warned = false;
                }
                dispatch_message(&controller, timed);
            }
            Err(RecvTimeoutError::Timeout) => {
                if !warned {
                    warn!("No MIDI input received for {:?}", INACTIVITY_TIMEOUT);
                    warned = true;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("MIDI input loop stopped");
}
