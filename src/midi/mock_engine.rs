use crate::midi::{MidiEngine, MidiError, MidiMessage, Result};
use std::sync::{Arc, Mutex};

/// Shared log of everything a [`MockMidiEngine`] was asked to send
pub type SentMessages = Arc<Mutex<Vec<MidiMessage>>>;

/// In-memory transport for tests and device-less runs
#[derive(Default)]
pub struct MockMidiEngine {
    sent: SentMessages,
    fail_sends: bool,
}

impl MockMidiEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send records the message and then reports a failure
    pub fn failing() -> Self {
        MockMidiEngine {
            sent: SentMessages::default(),
            fail_sends: true,
        }
    }

    pub fn sent_messages(&self) -> SentMessages {
        Arc::clone(&self.sent)
    }
}

impl MidiEngine for MockMidiEngine {
    fn send(&mut self, msg: MidiMessage) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(msg);
        }
        if self.fail_sends {
            return Err(MidiError::SendError("mock engine configured to fail".into()));
        }
        Ok(())
    }
}
