//! Audio mixer pre-flight.
//!
//! Best-effort `amixer` invocation bringing the configured controls up
//! to the configured level before the backend starts. Failures are
//! logged and ignored; the mixer is an external collaborator, not a
//! dependency.

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::MixerConfig;

pub async fn set_levels(cfg: &MixerConfig) {
    for control in &cfg.controls {
        match Command::new("amixer")
            .args(["set", control, &cfg.level])
            .output()
            .await
        {
            Ok(output) if output.status.success() => {
                debug!("Mixer control '{}' set to {}", control, cfg.level);
            }
            Ok(output) => {
                warn!(
                    "amixer set {} {} failed: {}",
                    control,
                    cfg.level,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
            Err(e) => {
                warn!("amixer not runnable: {}", e);
                // One missing binary means they will all fail.
                return;
            }
        }
    }
}
