//! Device-local voice muting.
//!
//! When the backend generates the sound, the controller's built-in
//! module would otherwise still play its own voices on every hit. This
//! optional extension zeroes the device-local level of each remapped
//! note via the GM drum-level NRPN on startup and restores it during
//! drain. Disabled by default; some modules handle this better from
//! their own front panel.

use anyhow::Result;
use midir::MidiOutputConnection;
use tracing::{debug, warn};

use crate::midi::MidiMessage;

/// NRPN MSB for per-note drum instrument level.
const NRPN_DRUM_LEVEL_MSB: u8 = 0x1A;

/// Raw byte sink for the mute sequences, so the restore logic is
/// testable against a recording sink instead of a hardware port.
pub trait RawMidiOut {
    fn send_bytes(&mut self, data: &[u8]) -> Result<()>;
}

impl RawMidiOut for MidiOutputConnection {
    fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.send(data)
            .map_err(|e| anyhow::anyhow!("MIDI send failed: {}", e))
    }
}

impl RawMidiOut for &mut Vec<Vec<u8>> {
    fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.push(data.to_vec());
        Ok(())
    }
}

pub struct LocalMute<O = MidiOutputConnection> {
    conn: O,
    channel: u8,
    notes: Vec<u8>,
}

impl<O: RawMidiOut> LocalMute<O> {
    pub fn new(conn: O, channel: u8, notes: Vec<u8>) -> Self {
        Self { conn, channel, notes }
    }

    /// Zero the device-local level of every configured note.
    pub fn apply(&mut self) {
        debug!("Muting {} device-local voices", self.notes.len());
        for note in self.notes.clone() {
            self.set_level(note, 0);
        }
    }

    /// Put the device-local levels back to full.
    pub fn restore(&mut self) {
        debug!("Restoring {} device-local voices", self.notes.len());
        for note in self.notes.clone() {
            self.set_level(note, 127);
        }
    }

    fn set_level(&mut self, note: u8, level: u8) {
        for msg in nrpn_drum_level(self.channel, note, level) {
            if let Err(e) = self.conn.send_bytes(&msg.encode()) {
                warn!("Local mute send failed for note {}: {}", note, e);
                return;
            }
        }
    }
}

/// The three-message NRPN sequence setting one drum voice's level.
fn nrpn_drum_level(channel: u8, note: u8, level: u8) -> [MidiMessage; 3] {
    [
        MidiMessage::ControlChange { channel, cc: 99, value: NRPN_DRUM_LEVEL_MSB },
        MidiMessage::ControlChange { channel, cc: 98, value: note },
        MidiMessage::ControlChange { channel, cc: 6, value: level },
    ]
}
