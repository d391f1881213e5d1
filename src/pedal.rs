//! Hi-hat pedal state inference.
//!
//! The controller does not reliably transmit a dedicated pedal CC, so
//! openness is inferred from whichever evidence actually arrives:
//!
//! 1. the pedal controller CC (canonical when present; value at or
//!    above the threshold reads as Open),
//! 2. the pedal chick note (always Closed),
//! 3. the raw closed/open hat pad notes, when the source stream still
//!    carries them.
//!
//! Every evidence event overwrites the state outright; there is no
//! debounce or averaging. With no evidence at all the tracker stays at
//! its configured default, which is a reduced-fidelity mode, not an
//! error.

use serde::Deserialize;
use std::fmt;

use crate::config::PedalConfig;
use crate::midi::MidiMessage;

/// Pedal openness estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PedalState {
    Open,
    Closed,
    Unknown,
}

impl fmt::Display for PedalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PedalState::Open => write!(f, "open"),
            PedalState::Closed => write!(f, "closed"),
            PedalState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Tracks the current pedal position from inbound evidence.
pub struct PedalTracker {
    cfg: PedalConfig,
    state: PedalState,
}

impl PedalTracker {
    pub fn new(cfg: PedalConfig) -> Self {
        let state = cfg.default_state;
        Self { cfg, state }
    }

    /// Current estimate, without consuming or mutating anything.
    pub fn current(&self) -> PedalState {
        self.state
    }

    /// Feed one inbound message. Returns the new state when the message
    /// was pedal evidence, None when it was not.
    pub fn observe(&mut self, msg: &MidiMessage) -> Option<PedalState> {
        let new_state = self.classify(msg)?;
        self.state = new_state;
        Some(new_state)
    }

    fn classify(&self, msg: &MidiMessage) -> Option<PedalState> {
        match *msg {
            MidiMessage::ControlChange { cc, value, .. } if cc == self.cfg.controller => {
                if value >= self.cfg.threshold {
                    Some(PedalState::Open)
                } else {
                    Some(PedalState::Closed)
                }
            }
            // Chick strikes count regardless of velocity, so the
            // velocity-0 NoteOff form counts too.
            MidiMessage::NoteOn { note, .. } | MidiMessage::NoteOff { note, .. } => {
                if Some(note) == self.cfg.chick_note {
                    Some(PedalState::Closed)
                } else if Some(note) == self.cfg.closed_note {
                    Some(PedalState::Closed)
                } else if Some(note) == self.cfg.open_note {
                    Some(PedalState::Open)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}
