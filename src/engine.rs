//! The real-time driver.
//!
//! A single task pulls inbound events in arrival order, feeds the
//! pedal tracker, remaps, and forwards to the bound sink. Events are
//! never reordered, buffered, or batched; the pull-remap-push sequence
//! for one event always runs to completion before the next event or a
//! shutdown request is looked at, so cancellation never leaves a
//! half-forwarded event behind.

use anyhow::Result;
use midir::{MidiInputConnection, MidiOutputConnection};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::midi::MidiMessage;
use crate::mute::LocalMute;
use crate::pedal::PedalTracker;
use crate::remap::Remapper;
use crate::synth::SynthSupervisor;

/// Where remapped events go.
pub enum OutputSink {
    /// A raw MIDI port: a device loopback or a daemon backend's port.
    Device(MidiOutputConnection),
    /// The supervised backend's interactive command channel.
    Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnginePhase {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Owns the port binding and the supervised backend for one run.
pub struct EngineLoop {
    channel: u8,
    tracker: PedalTracker,
    remapper: Remapper,
    rx: mpsc::Receiver<MidiMessage>,
    // Held only to keep the midir callback alive; closed on drain.
    input_conn: Option<MidiInputConnection<()>>,
    sink: OutputSink,
    supervisor: Option<SynthSupervisor>,
    mute: Option<LocalMute>,
    phase: EnginePhase,
}

impl EngineLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: u8,
        tracker: PedalTracker,
        remapper: Remapper,
        rx: mpsc::Receiver<MidiMessage>,
        input_conn: MidiInputConnection<()>,
        sink: OutputSink,
        supervisor: Option<SynthSupervisor>,
        mute: Option<LocalMute>,
    ) -> Self {
        Self {
            channel,
            tracker,
            remapper,
            rx,
            input_conn: Some(input_conn),
            sink,
            supervisor,
            mute,
            phase: EnginePhase::Idle,
        }
    }

    /// Run until the input closes or `shutdown` resolves, then drain:
    /// release ports, restore muted voices, stop the backend. The
    /// release path runs on every exit.
    pub async fn run(mut self, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
        debug!("Engine phase: {:?} -> Running", self.phase);
        self.phase = EnginePhase::Running;
        info!("Engine running, waiting for pad hits");

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                maybe_msg = self.rx.recv() => {
                    match maybe_msg {
                        Some(msg) => self.handle(msg).await,
                        None => {
                            warn!("Input stream closed");
                            break;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.drain().await;
        Ok(())
    }

    async fn handle(&mut self, msg: MidiMessage) {
        let out = process_event(&mut self.tracker, &self.remapper, &msg);

        // Log only hits that actually moved, at full detail.
        if let (MidiMessage::NoteOn { note, velocity, .. }, Some(new_note)) = (&msg, out.note()) {
            if *note != new_note {
                info!("Remap: {} -> {} (vel {})", note, new_note, velocity);
            }
        } else {
            trace!("Forward: {}", out);
        }

        self.forward(&out).await;
    }

    async fn forward(&mut self, msg: &MidiMessage) {
        match &mut self.sink {
            OutputSink::Device(conn) => {
                if let Err(e) = conn.send(&msg.encode()) {
                    warn!("Output send failed: {}", e);
                }
            }
            OutputSink::Backend => {
                let Some(line) = render_backend_command(msg, self.channel) else {
                    debug!("No backend rendering for {}, skipped", msg);
                    return;
                };
                if let Some(supervisor) = &mut self.supervisor {
                    if let Err(e) = supervisor.send_command(&line).await {
                        warn!("Backend command failed: {}", e);
                    }
                }
            }
        }
    }

    async fn drain(&mut self) {
        debug!("Engine phase: {:?} -> Draining", self.phase);
        self.phase = EnginePhase::Draining;

        // Closing the input first guarantees no event is half-consumed.
        if let Some(conn) = self.input_conn.take() {
            conn.close();
        }
        self.rx.close();

        if let Some(mute) = &mut self.mute {
            mute.restore();
        }

        if let Some(supervisor) = &mut self.supervisor {
            supervisor.stop().await;
        }

        self.phase = EnginePhase::Stopped;
        info!("Engine stopped");
    }
}

/// Per-event core: update pedal state from evidence, then remap with
/// the now-current state. Strict arrival order makes a CC immediately
/// ahead of a note affect that note.
pub fn process_event(
    tracker: &mut PedalTracker,
    remapper: &Remapper,
    msg: &MidiMessage,
) -> MidiMessage {
    if let Some(state) = tracker.observe(msg) {
        trace!("Pedal evidence: {} -> {}", msg, state);
    }
    remapper.remap(msg, tracker.current())
}

/// Render one event as a backend shell command. The channel is always
/// the configured drum channel; events with no shell equivalent render
/// to None.
pub fn render_backend_command(msg: &MidiMessage, channel: u8) -> Option<String> {
    match *msg {
        MidiMessage::NoteOn { note, velocity, .. } if velocity > 0 => {
            Some(format!("noteon {} {} {}", channel, note, velocity))
        }
        MidiMessage::NoteOn { note, .. } | MidiMessage::NoteOff { note, .. } => {
            Some(format!("noteoff {} {}", channel, note))
        }
        MidiMessage::ControlChange { cc, value, .. } => {
            Some(format!("cc {} {} {}", channel, cc, value))
        }
        _ => None,
    }
}
