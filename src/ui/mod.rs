//! Terminal status display
//!
//! [`StatusView`] folds [`SyncEvent`]s and periodic snapshots into a display
//! model; [`run_status_display`] renders it with indicatif progress bars:
//! - pulses into the current bar (one whole-note boundary)
//! - quarter note within the bar
//! - a transport spinner with tempo, position and marker state

mod progress;

pub use progress::{create_beat_progress, create_boundary_progress, create_transport_spinner};

use crate::config::PULSES_PER_QUARTER_NOTE;
use crate::sync::{Position, SyncController, SyncEvent, SyncSnapshot, TransportState};
use indicatif::{MultiProgress, ProgressDrawTarget};
use log::debug;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);
const EVENT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct StatusView {
    pub transport: TransportState,
    pub bpm: f64,
    pub position: Position,
    pub marker_on: bool,
    /// Quarter-note index of the most recent boundary marker
    pub last_boundary: Option<i64>,
    pub boundaries_fired: u64,
    pub incoming_pulses: u64,
}

impl Default for StatusView {
    fn default() -> Self {
        StatusView {
            transport: TransportState::Stopped,
            bpm: crate::config::DEFAULT_BPM,
            position: Position::default(),
            marker_on: false,
            last_boundary: None,
            boundaries_fired: 0,
            incoming_pulses: 0,
        }
    }
}

impl StatusView {
    pub fn apply(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::RunningChanged(false) => self.transport = TransportState::Stopped,
            // Master or slave is only known from a snapshot
            SyncEvent::RunningChanged(true) => {}
            SyncEvent::TempoChanged(bpm) => self.bpm = bpm,
            SyncEvent::PulseTick => self.position.advance(),
            SyncEvent::BoundaryFired(quarter_note) => {
                self.last_boundary = Some(quarter_note);
                self.boundaries_fired += 1;
                self.marker_on = true;
            }
            SyncEvent::MarkerReleased => self.marker_on = false,
            SyncEvent::PositionChanged {
                beats,
                quarter_notes,
            } => self.position = Position::from_jump(beats, quarter_notes),
        }
    }

    pub fn refresh(&mut self, snapshot: &SyncSnapshot) {
        self.transport = snapshot.transport;
        self.bpm = snapshot.bpm;
        self.position = snapshot.position;
        self.marker_on = snapshot.note_active;
        self.incoming_pulses = snapshot.incoming_pulse_count;
    }

    pub fn message(&self) -> String {
        let (bar, beat) = self.position.bar_and_beat();
        let transport = match self.transport {
            TransportState::Stopped => "stopped",
            TransportState::RunningMaster => "master",
            TransportState::RunningSlave => "slave",
        };
        let marker = if self.marker_on { "*" } else { " " };
        let last = self
            .last_boundary
            .map(|qn| format!("qn {}", qn))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{} | {:.2} BPM | {}.{} [{}] | last boundary {} | in {}",
            transport, self.bpm, bar, beat, marker, last, self.incoming_pulses
        )
    }
}

/// Renders the controller state on stderr until the controller is dropped
pub fn run_status_display(controller: &Arc<SyncController>) -> thread::JoinHandle<()> {
    let events = controller.subscribe_bounded(EVENT_QUEUE_CAPACITY);
    let controller: Weak<SyncController> = Arc::downgrade(controller);

    thread::spawn(move || {
        let multi_progress = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let boundary_pb = multi_progress.add(create_boundary_progress());
        let beat_pb = multi_progress.add(create_beat_progress());
        let transport_pb = multi_progress.add(create_transport_spinner());
        let mut view = StatusView::default();

        loop {
            thread::sleep(REFRESH_INTERVAL);
            for event in events.try_iter() {
                view.apply(event);
            }

            let snapshot = match controller.upgrade() {
                Some(controller) => controller.snapshot(),
                None => break,
            };
            view.refresh(&snapshot);

            let position = view.position;
            boundary_pb.set_position(position.pulses_into_boundary());
            beat_pb.set_position(position.pulses_into_boundary() / PULSES_PER_QUARTER_NOTE + 1);
            transport_pb.set_message(view.message());
            transport_pb.tick();
        }

        debug!("Status display stopped");
        boundary_pb.finish_and_clear();
        beat_pb.finish_and_clear();
        transport_pb.finish_and_clear();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_folds_boundary_events() {
        let mut view = StatusView::default();
        view.apply(SyncEvent::BoundaryFired(0));
        assert!(view.marker_on);
        view.apply(SyncEvent::MarkerReleased);
        view.apply(SyncEvent::BoundaryFired(4));

        assert_eq!(view.last_boundary, Some(4));
        assert_eq!(view.boundaries_fired, 2);
        assert!(view.marker_on);
    }

    #[test]
    fn test_view_tracks_position() {
        let mut view = StatusView::default();
        view.apply(SyncEvent::PositionChanged {
            beats: 16,
            quarter_notes: 4.0,
        });
        for _ in 0..24 {
            view.apply(SyncEvent::PulseTick);
        }
        assert_eq!(view.position.pulse_count, 120);
        assert_eq!(view.position.bar_and_beat(), (2, 2));

        view.apply(SyncEvent::TempoChanged(98.0));
        assert!(view.message().contains("98.00 BPM"));
        assert!(view.message().contains("2.2"));
    }
}
