//! Note remapping.
//!
//! Two layers: a static 128-entry table with identity fallback, and an
//! optional "dynamic group" of notes whose target is picked by the
//! current pedal state instead of the table. Dynamic membership wins
//! when a note appears in both.

use anyhow::{bail, Result};
use std::collections::HashMap;

use crate::config::DynamicConfig;
use crate::midi::MidiMessage;
use crate::pedal::PedalState;

/// Static note -> note mapping with identity fallback.
///
/// The note domain is 0-127, so a direct array beats a hash map.
#[derive(Debug, Clone)]
pub struct RemapTable([u8; 128]);

impl RemapTable {
    pub fn from_entries(entries: &HashMap<u8, u8>) -> Result<Self> {
        let mut table = [0u8; 128];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = i as u8;
        }
        for (&from, &to) in entries {
            if from > 127 || to > 127 {
                bail!("remap entry {} -> {} out of note range 0-127", from, to);
            }
            table[from as usize] = to;
        }
        Ok(Self(table))
    }

    /// Total over the input domain; unmapped notes come back unchanged.
    pub fn lookup(&self, note: u8) -> u8 {
        self.0[(note & 0x7F) as usize]
    }
}

#[derive(Debug, Clone)]
struct DynamicGroup {
    members: [bool; 128],
    open_target: u8,
    closed_target: u8,
}

/// Pure event transformation: one inbound event plus the current pedal
/// state produces exactly one outbound event.
#[derive(Debug, Clone)]
pub struct Remapper {
    table: RemapTable,
    dynamic: Option<DynamicGroup>,
}

impl Remapper {
    pub fn new(entries: &HashMap<u8, u8>, dynamic: Option<&DynamicConfig>) -> Result<Self> {
        let table = RemapTable::from_entries(entries)?;
        let dynamic = match dynamic {
            Some(cfg) => {
                let mut members = [false; 128];
                for &note in &cfg.notes {
                    if note > 127 {
                        bail!("dynamic group note {} out of note range 0-127", note);
                    }
                    members[note as usize] = true;
                }
                Some(DynamicGroup {
                    members,
                    open_target: cfg.open_target,
                    closed_target: cfg.closed_target,
                })
            }
            None => None,
        };
        Ok(Self { table, dynamic })
    }

    /// Remap one event. Velocity and channel are always preserved;
    /// non-note events pass through untouched.
    pub fn remap(&self, msg: &MidiMessage, pedal: PedalState) -> MidiMessage {
        match *msg {
            MidiMessage::NoteOn { channel, note, velocity } => MidiMessage::NoteOn {
                channel,
                note: self.target(note, pedal),
                velocity,
            },
            MidiMessage::NoteOff { channel, note, velocity } => MidiMessage::NoteOff {
                channel,
                note: self.target(note, pedal),
                velocity,
            },
            ref other => other.clone(),
        }
    }

    fn target(&self, note: u8, pedal: PedalState) -> u8 {
        if let Some(dynamic) = &self.dynamic {
            if dynamic.members[(note & 0x7F) as usize] {
                // Unknown plays it safe as closed.
                return match pedal {
                    PedalState::Open => dynamic.open_target,
                    PedalState::Closed | PedalState::Unknown => dynamic.closed_target,
                };
            }
        }
        self.table.lookup(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn note_on(note: u8, velocity: u8) -> MidiMessage {
        MidiMessage::NoteOn { channel: 9, note, velocity }
    }

    fn swap_remapper() -> Remapper {
        let entries = HashMap::from([(38, 42), (40, 42), (42, 38), (46, 38)]);
        Remapper::new(&entries, None).unwrap()
    }

    fn dynamic_remapper() -> Remapper {
        let entries = HashMap::from([(42, 38), (46, 38)]);
        let dynamic = DynamicConfig {
            notes: vec![38, 40],
            open_target: 46,
            closed_target: 42,
        };
        Remapper::new(&entries, Some(&dynamic)).unwrap()
    }

    #[test]
    fn test_table_lookup_identity_fallback() {
        let table = RemapTable::from_entries(&HashMap::from([(38, 42)])).unwrap();

        assert_eq!(table.lookup(38), 42);
        assert_eq!(table.lookup(36), 36);
        assert_eq!(table.lookup(127), 127);
    }

    #[test]
    fn test_table_rejects_out_of_range() {
        assert!(RemapTable::from_entries(&HashMap::from([(200, 42)])).is_err());
        assert!(RemapTable::from_entries(&HashMap::from([(38, 200)])).is_err());
    }

    #[test]
    fn test_static_remap_preserves_velocity_and_channel() {
        let r = swap_remapper();

        let out = r.remap(&note_on(38, 100), PedalState::Unknown);
        assert_eq!(out, note_on(42, 100));

        let out = r.remap(
            &MidiMessage::NoteOff { channel: 9, note: 46, velocity: 0 },
            PedalState::Open,
        );
        assert_eq!(out, MidiMessage::NoteOff { channel: 9, note: 38, velocity: 0 });
    }

    #[test]
    fn test_dynamic_group_follows_pedal() {
        let r = dynamic_remapper();

        assert_eq!(r.remap(&note_on(38, 80), PedalState::Open), note_on(46, 80));
        assert_eq!(r.remap(&note_on(38, 80), PedalState::Closed), note_on(42, 80));
        assert_eq!(r.remap(&note_on(40, 5), PedalState::Open), note_on(46, 5));
        // Unknown behaves as closed
        assert_eq!(r.remap(&note_on(40, 80), PedalState::Unknown), note_on(42, 80));
    }

    #[test]
    fn test_dynamic_membership_beats_static_entry() {
        // 38 claimed by both the table and the dynamic group
        let entries = HashMap::from([(38, 50)]);
        let dynamic = DynamicConfig {
            notes: vec![38],
            open_target: 46,
            closed_target: 42,
        };
        let r = Remapper::new(&entries, Some(&dynamic)).unwrap();

        assert_eq!(r.remap(&note_on(38, 90), PedalState::Open), note_on(46, 90));
        assert_eq!(r.remap(&note_on(38, 90), PedalState::Closed), note_on(42, 90));
    }

    #[test]
    fn test_control_change_passes_through() {
        let r = dynamic_remapper();
        let cc = MidiMessage::ControlChange { channel: 9, cc: 4, value: 100 };

        assert_eq!(r.remap(&cc, PedalState::Open), cc);
    }

    #[test]
    fn test_other_passes_through() {
        let r = swap_remapper();
        let other = MidiMessage::Other(vec![0xF8]);

        assert_eq!(r.remap(&other, PedalState::Closed), other);
    }

    proptest! {
        #[test]
        fn prop_unmapped_notes_are_identity(note in 0u8..128, velocity in 1u8..128) {
            let r = dynamic_remapper();
            prop_assume!(![38, 40, 42, 46].contains(&note));

            for pedal in [PedalState::Open, PedalState::Closed, PedalState::Unknown] {
                let out = r.remap(&note_on(note, velocity), pedal);
                prop_assert_eq!(out.note(), Some(note));
            }
        }

        #[test]
        fn prop_dynamic_target_ignores_velocity(velocity in 1u8..128) {
            let r = dynamic_remapper();

            let open = r.remap(&note_on(38, velocity), PedalState::Open);
            let closed = r.remap(&note_on(38, velocity), PedalState::Closed);
            prop_assert_eq!(open.note(), Some(46));
            prop_assert_eq!(closed.note(), Some(42));
        }
    }
}
