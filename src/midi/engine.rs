use std::error::Error;
use std::fmt;
use std::time::Instant;

/// Custom error type for MIDI operations
#[derive(Debug)]
pub enum MidiError {
    /// Error when sending a MIDI message
    SendError(String),
    /// Error when connecting to a MIDI device
    ConnectionError(String),
}

impl fmt::Display for MidiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiError::SendError(msg) => write!(f, "MIDI send error: {}", msg),
            MidiError::ConnectionError(msg) => write!(f, "MIDI connection error: {}", msg),
        }
    }
}

impl Error for MidiError {}

impl From<midir::SendError> for MidiError {
    fn from(err: midir::SendError) -> Self {
        MidiError::SendError(err.to_string())
    }
}

impl From<midir::InitError> for MidiError {
    fn from(err: midir::InitError) -> Self {
        MidiError::ConnectionError(err.to_string())
    }
}

impl From<midir::PortInfoError> for MidiError {
    fn from(err: midir::PortInfoError) -> Self {
        MidiError::ConnectionError(err.to_string())
    }
}

/// Messages exchanged with the external sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note On message with note number and velocity
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note Off message with note number and velocity
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Song Position Pointer, in sixteenth notes since song start
    SongPositionPointer { position: u16 },
    /// MIDI Clock timing message
    Clock,
    /// MIDI Start message
    Start,
    /// MIDI Stop message
    Stop,
    /// MIDI Continue message
    Continue,
}

/// Largest value a 14-bit song position pointer can carry
pub const MAX_SONG_POSITION: u16 = 0x3FFF;

impl MidiMessage {
    pub fn from_bytes(data: &[u8]) -> Option<MidiMessage> {
        let status = *data.first()?;

        match status {
            0xF8 => return Some(MidiMessage::Clock),
            0xFA => return Some(MidiMessage::Start),
            0xFB => return Some(MidiMessage::Continue),
            0xFC => return Some(MidiMessage::Stop),
            0xF2 if data.len() >= 3 => {
                let position = u16::from(data[1] & 0x7F) | (u16::from(data[2] & 0x7F) << 7);
                return Some(MidiMessage::SongPositionPointer { position });
            }
            _ => {}
        }

        match status & 0xF0 {
            0x90 if data.len() >= 3 => Some(MidiMessage::NoteOn {
                channel: status & 0x0F,
                note: data[1],
                velocity: data[2],
            }),
            0x80 if data.len() >= 3 => Some(MidiMessage::NoteOff {
                channel: status & 0x0F,
                note: data[1],
                velocity: data[2],
            }),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiMessage::SongPositionPointer { position } => {
                let position = (*position).min(MAX_SONG_POSITION);
                vec![0xF2, (position & 0x7F) as u8, ((position >> 7) & 0x7F) as u8]
            }
            MidiMessage::Clock => vec![0xF8],
            MidiMessage::Start => vec![0xFA],
            MidiMessage::Stop => vec![0xFC],
            MidiMessage::Continue => vec![0xFB],
        }
    }
}

/// An inbound message stamped with its arrival time at the driver callback
#[derive(Debug, Clone, Copy)]
pub struct TimedMessage {
    pub received_at: Instant,
    pub message: MidiMessage,
}

/// Result type for MIDI operations
pub type Result<T> = std::result::Result<T, MidiError>;

/// Outbound side of the MIDI transport
pub trait MidiEngine: Send {
    /// Sends a MIDI message to the device
    fn send(&mut self, msg: MidiMessage) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_realtime_parsing() {
        assert_eq!(MidiMessage::from_bytes(&[0xF8]), Some(MidiMessage::Clock));
        assert_eq!(MidiMessage::from_bytes(&[0xFA]), Some(MidiMessage::Start));
        assert_eq!(MidiMessage::from_bytes(&[0xFB]), Some(MidiMessage::Continue));
        assert_eq!(MidiMessage::from_bytes(&[0xFC]), Some(MidiMessage::Stop));
        // Active sensing is ignored
        assert_eq!(MidiMessage::from_bytes(&[0xFE]), None);
        assert_eq!(MidiMessage::from_bytes(&[]), None);
    }

    #[test]
    fn test_song_position_pointer_parsing() {
        // 0x10 | (0x01 << 7) = 144 sixteenths = 36 quarter notes
        assert_eq!(
            MidiMessage::from_bytes(&[0xF2, 0x10, 0x01]),
            Some(MidiMessage::SongPositionPointer { position: 144 })
        );
        // Truncated pointer
        assert_eq!(MidiMessage::from_bytes(&[0xF2, 0x10]), None);
    }

    #[test]
    fn test_song_position_pointer_encoding() {
        let msg = MidiMessage::SongPositionPointer { position: 144 };
        assert_eq!(msg.to_bytes(), vec![0xF2, 0x10, 0x01]);

        let msg = MidiMessage::SongPositionPointer { position: u16::MAX };
        assert_eq!(msg.to_bytes(), vec![0xF2, 0x7F, 0x7F]);
    }

    #[test]
    fn test_note_messages() {
        let on = MidiMessage::NoteOn {
            channel: 2,
            note: 60,
            velocity: 100,
        };
        assert_eq!(on.to_bytes(), vec![0x92, 60, 100]);
        assert_eq!(MidiMessage::from_bytes(&[0x92, 60, 100]), Some(on));

        let off = MidiMessage::NoteOff {
            channel: 0,
            note: 60,
            velocity: 0,
        };
        assert_eq!(off.to_bytes(), vec![0x80, 60, 0]);
    }

    #[test]
    fn test_error_display() {
        let err = MidiError::SendError("port closed".to_string());
        assert_eq!(err.to_string(), "MIDI send error: port closed");
    }
}
