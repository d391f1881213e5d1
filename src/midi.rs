//! MIDI message types and byte-level parsing/encoding.

use std::fmt;

/// MIDI messages the gateway cares about. Anything else is carried
/// opaquely in `Other` so it can still be forwarded byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Control Change: channel (0-15), cc (0-127), value (0-127)
    ControlChange { channel: u8, cc: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Pitch Bend: channel (0-15), value (0-16383, 14-bit)
    PitchBend { channel: u8, value: u16 },

    /// Any other valid MIDI data, kept as raw bytes
    Other(Vec<u8>),
}

impl MidiMessage {
    /// Parse a MIDI message from raw bytes.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.is_empty() {
            return None;
        }

        let status = data[0];

        // Running status would need state we don't keep; drop it.
        if status < 0x80 {
            return None;
        }

        let message_type = status & 0xF0;
        let channel = status & 0x0F;

        match message_type {
            0x80 => {
                if data.len() < 3 {
                    return None;
                }
                Some(MidiMessage::NoteOff {
                    channel,
                    note: data[1] & 0x7F,
                    velocity: data[2] & 0x7F,
                })
            }
            0x90 => {
                // Note On with velocity 0 is a Note Off
                if data.len() < 3 {
                    return None;
                }
                let note = data[1] & 0x7F;
                let velocity = data[2] & 0x7F;

                if velocity == 0 {
                    Some(MidiMessage::NoteOff { channel, note, velocity: 0 })
                } else {
                    Some(MidiMessage::NoteOn { channel, note, velocity })
                }
            }
            0xB0 => {
                if data.len() < 3 {
                    return None;
                }
                Some(MidiMessage::ControlChange {
                    channel,
                    cc: data[1] & 0x7F,
                    value: data[2] & 0x7F,
                })
            }
            0xC0 => {
                if data.len() < 2 {
                    return None;
                }
                Some(MidiMessage::ProgramChange {
                    channel,
                    program: data[1] & 0x7F,
                })
            }
            0xE0 => {
                if data.len() < 3 {
                    return None;
                }
                let lsb = (data[1] & 0x7F) as u16;
                let msb = (data[2] & 0x7F) as u16;
                Some(MidiMessage::PitchBend {
                    channel,
                    value: (msb << 7) | lsb,
                })
            }
            _ => Some(MidiMessage::Other(data.to_vec())),
        }
    }

    /// Encode the message back to MIDI bytes.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let lsb = (value & 0x7F) as u8;
                let msb = ((value >> 7) & 0x7F) as u8;
                vec![0xE0 | (channel & 0x0F), lsb, msb]
            }
            MidiMessage::Other(ref data) => data.clone(),
        }
    }

    /// The note number for note messages, None otherwise.
    pub fn note(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOn { note, .. } | MidiMessage::NoteOff { note, .. } => Some(note),
            _ => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
            MidiMessage::Other(ref data) => {
                write!(f, "Other {}", format_hex(data))
            }
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_parsing() {
        let data = vec![0x99, 38, 100]; // Note On, ch 10, snare, velocity 100
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(msg, MidiMessage::NoteOn {
            channel: 9,
            note: 38,
            velocity: 100,
        });
    }

    #[test]
    fn test_note_on_velocity_zero() {
        let data = vec![0x90, 60, 0]; // Note On with velocity 0 = Note Off
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(msg, MidiMessage::NoteOff {
            channel: 0,
            note: 60,
            velocity: 0,
        });
    }

    #[test]
    fn test_control_change() {
        let data = vec![0xB9, 4, 100]; // CC ch 10, hi-hat pedal, value 100
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(msg, MidiMessage::ControlChange {
            channel: 9,
            cc: 4,
            value: 100,
        });
    }

    #[test]
    fn test_unknown_kept_as_other() {
        let data = vec![0xF8]; // timing clock
        let msg = MidiMessage::parse(&data).unwrap();

        assert_eq!(msg, MidiMessage::Other(vec![0xF8]));
        assert_eq!(msg.encode(), vec![0xF8]);
    }

    #[test]
    fn test_encode_note_on() {
        let msg = MidiMessage::NoteOn {
            channel: 9,
            note: 42,
            velocity: 90,
        };

        assert_eq!(msg.encode(), vec![0x99, 42, 90]);
    }

    #[test]
    fn test_encode_pitch_bend() {
        let msg = MidiMessage::PitchBend { channel: 0, value: 8192 };
        let bytes = msg.encode();

        assert_eq!(bytes, vec![0xE0, 0x00, 0x40]);
        assert_eq!(MidiMessage::parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_empty_and_running_status_rejected() {
        assert_eq!(MidiMessage::parse(&[]), None);
        assert_eq!(MidiMessage::parse(&[0x38, 100]), None);
    }
}
