//! MIDI port discovery and binding.
//!
//! Selection policy, first match wins: a case-insensitive substring
//! match against the configured device fragments; else the first port
//! whose name avoids the exclusion fragments (skips loopback
//! pseudo-ports like "Midi Through"); else the first port outright.
//!
//! Ports are re-enumerated on every call. A spawned synth registers
//! its port asynchronously, so [`PortBinder::wait_for_output`] retries
//! enumeration with a bounded backoff.

use anyhow::{Context, Result};
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::midi::{format_hex, MidiMessage};

const CLIENT_NAME: &str = "edrum-gw";

#[derive(Debug, Error)]
pub enum PortError {
    #[error("no MIDI {direction} port matched {wanted:?} (available: {available:?})")]
    NotFound {
        direction: &'static str,
        wanted: Vec<String>,
        available: Vec<String>,
    },
}

/// Pick an index from `names` following the selection policy.
pub fn pick_port(names: &[String], matches: &[String], exclude: &[String]) -> Option<usize> {
    let contains = |name: &str, fragment: &str| {
        name.to_lowercase().contains(&fragment.to_lowercase())
    };

    if let Some(idx) = names
        .iter()
        .position(|name| matches.iter().any(|m| contains(name, m)))
    {
        return Some(idx);
    }
    if let Some(idx) = names
        .iter()
        .position(|name| !exclude.iter().any(|e| contains(name, e)))
    {
        return Some(idx);
    }
    if names.is_empty() {
        None
    } else {
        Some(0)
    }
}

/// Discovers and opens the input source and output sink.
pub struct PortBinder {
    input_match: Vec<String>,
    exclude_match: Vec<String>,
}

impl PortBinder {
    pub fn new(input_match: Vec<String>, exclude_match: Vec<String>) -> Self {
        Self { input_match, exclude_match }
    }

    /// Open the drum controller's input port. Parsed events are pushed
    /// into `tx` in arrival order; the connection must be kept alive
    /// for as long as events are wanted.
    pub fn connect_input(
        &self,
        tx: mpsc::Sender<MidiMessage>,
    ) -> Result<(MidiInputConnection<()>, String)> {
        let midi_in = MidiInput::new(CLIENT_NAME).context("Failed to create MIDI input")?;

        let ports = midi_in.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_in.port_name(p).unwrap_or_default())
            .collect();

        let idx = pick_port(&names, &self.input_match, &self.exclude_match).ok_or_else(|| {
            PortError::NotFound {
                direction: "input",
                wanted: self.input_match.clone(),
                available: names.clone(),
            }
        })?;
        let name = names[idx].clone();
        debug!("Selected input port: '{}'", name);

        let conn = midi_in
            .connect(
                &ports[idx],
                CLIENT_NAME,
                move |_timestamp, data, _| {
                    if let Some(msg) = MidiMessage::parse(data) {
                        // try_send keeps the realtime callback non-blocking;
                        // the channel is deep enough that drops mean the
                        // engine is long gone anyway.
                        if tx.try_send(msg).is_err() {
                            warn!("Event channel full, dropping: {}", format_hex(data));
                        }
                    } else {
                        debug!("Unparseable MIDI input: {}", format_hex(data));
                    }
                },
                (),
            )
            .map_err(|e| anyhow::anyhow!("Failed to connect input port '{}': {}", name, e))?;

        Ok((conn, name))
    }

    /// Open an output port picked by `matches`, re-enumerating now.
    pub fn connect_output(&self, matches: &[String]) -> Result<(MidiOutputConnection, String)> {
        let midi_out = MidiOutput::new(CLIENT_NAME).context("Failed to create MIDI output")?;

        let ports = midi_out.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_out.port_name(p).unwrap_or_default())
            .collect();

        let idx = pick_port(&names, matches, &self.exclude_match).ok_or_else(|| {
            PortError::NotFound {
                direction: "output",
                wanted: matches.to_vec(),
                available: names.clone(),
            }
        })?;
        let name = names[idx].clone();
        debug!("Selected output port: '{}'", name);

        let conn = midi_out
            .connect(&ports[idx], CLIENT_NAME)
            .map_err(|e| anyhow::anyhow!("Failed to connect output port '{}': {}", name, e))?;

        Ok((conn, name))
    }

    /// Wait for an output port matching `matches` to appear, retrying
    /// enumeration with a growing, capped backoff. Used right after a
    /// daemon backend spawn, instead of a blind settle sleep.
    pub async fn wait_for_output(
        &self,
        matches: &[String],
        attempts: u32,
        backoff_ms: u64,
    ) -> Result<(MidiOutputConnection, String)> {
        let total = attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=total {
            match self.connect_output(matches) {
                Ok(found) => return Ok(found),
                Err(e) => {
                    last_err = Some(e);
                    if let Some(delay) = retry_delay(attempt, total, backoff_ms) {
                        debug!(
                            "Output port not ready (attempt {}/{}), retrying in {:?}",
                            attempt, total, delay
                        );
                        sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no port enumeration attempts made")))
    }
}

/// Backoff before the next enumeration attempt: grows linearly, capped
/// at 10s, and None after the final attempt so a failing startup does
/// not sit in one last pointless sleep.
fn retry_delay(attempt: u32, attempts: u32, backoff_ms: u64) -> Option<Duration> {
    if attempt >= attempts {
        return None;
    }
    Some(Duration::from_millis((backoff_ms * attempt as u64).min(10_000)))
}

/// Print available ports for `--list-ports`.
pub fn list_ports() -> Result<()> {
    let midi_in = MidiInput::new(CLIENT_NAME)?;
    println!("=== MIDI input ports ===");
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            println!("  {}", name);
        }
    }

    let midi_out = MidiOutput::new(CLIENT_NAME)?;
    println!("\n=== MIDI output ports ===");
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            println!("  {}", name);
        }
    }

    Ok(())
}
