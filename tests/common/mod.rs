#![allow(dead_code)]

use barsyncrs::midi::{MockMidiEngine, SentMessages};
use barsyncrs::sync::{pulse_interval, ManualPulseTimer};
use barsyncrs::{SyncController, SyncEvent, SyncSettings};
use crossbeam::channel::Receiver;
use std::time::{Duration, Instant};

pub struct Harness {
    pub controller: SyncController,
    pub sent: SentMessages,
    pub timer: ManualPulseTimer,
    pub events: Receiver<SyncEvent>,
}

pub fn harness() -> Harness {
    harness_with(SyncSettings::default())
}

pub fn harness_with(settings: SyncSettings) -> Harness {
    let engine = MockMidiEngine::new();
    let sent = engine.sent_messages();
    let timer = ManualPulseTimer::new();
    let controller = SyncController::with_timer(engine, settings, timer.clone());
    let events = controller.subscribe();
    Harness {
        controller,
        sent,
        timer,
        events,
    }
}

impl Harness {
    pub fn drain_events(&self) -> Vec<SyncEvent> {
        self.events.try_iter().collect()
    }
}

/// Incoming clock with evenly spaced, injected timestamps
pub struct ClockFeed {
    start: Instant,
    interval: Duration,
    delivered: u32,
}

impl ClockFeed {
    pub fn at_bpm(bpm: f64) -> Self {
        ClockFeed {
            start: Instant::now(),
            interval: pulse_interval(bpm),
            delivered: 0,
        }
    }

    pub fn pulse(&mut self, controller: &SyncController) {
        self.delivered += 1;
        controller.handle_pulse_at(self.start + self.interval * self.delivered);
    }

    pub fn pulses(&mut self, controller: &SyncController, count: u32) {
        for _ in 0..count {
            self.pulse(controller);
        }
    }

    /// Feeds `count` pulses and returns (quarter note, pulse count) for each boundary fired
    pub fn pulses_recording_fires(&mut self, harness: &Harness, count: u32) -> Vec<(i64, u64)> {
        let mut fires = Vec::new();
        for _ in 0..count {
            self.pulse(&harness.controller);
            for event in harness.events.try_iter() {
                if let SyncEvent::BoundaryFired(quarter_note) = event {
                    fires.push((quarter_note, harness.controller.position().pulse_count));
                }
            }
        }
        fires
    }
}
