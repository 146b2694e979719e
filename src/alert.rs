use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::config::AlertConfig;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audible cue side channel.
pub trait AlertChannel: Send + Sync {
    fn emit_tone(&self, frequency_hz: u32, duration: Duration) -> Result<(), AlertError>;
}

/// Terminal bell on stderr, held for the tone duration. Terminals have no
/// pitch control, so the frequency is only logged.
pub struct TerminalBell;

impl AlertChannel for TerminalBell {
    fn emit_tone(&self, frequency_hz: u32, duration: Duration) -> Result<(), AlertError> {
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        drop(stderr);
        tracing::trace!(frequency_hz, duration_ms = duration.as_millis() as u64, "bell");
        thread::sleep(duration);
        Ok(())
    }
}

/// Fire-and-forget tone submission. Every job runs on its own detached
/// thread; nothing is joined and failures are dropped.
#[derive(Clone)]
pub struct AlertDispatcher {
    channel: Arc<dyn AlertChannel>,
    frequency_hz: u32,
    duration: Duration,
}

impl AlertDispatcher {
    pub fn new(channel: Arc<dyn AlertChannel>, config: &AlertConfig) -> Self {
        Self {
            channel,
            frequency_hz: config.tone_hz,
            duration: Duration::from_millis(config.tone_ms),
        }
    }

    pub fn submit(&self) {
        let channel = Arc::clone(&self.channel);
        let frequency_hz = self.frequency_hz;
        let duration = self.duration;

        let spawned = thread::Builder::new()
            .name("breathe-alert".to_string())
            .spawn(move || {
                if let Err(e) = channel.emit_tone(frequency_hz, duration) {
                    tracing::trace!(error = %e, "alert tone failed");
                }
            });

        if let Err(e) = spawned {
            tracing::trace!(error = %e, "failed to spawn alert thread");
        }
    }
}
