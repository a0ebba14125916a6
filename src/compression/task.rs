/*!
 * Compression Task
 * Background timer driving compaction passes
 */

use super::CompressionEngine;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Control messages for the compression task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionCommand {
    /// Run a pass now
    Trigger,
    Pause,
    Resume,
    Shutdown,
}

/// Handle to the compression background task
pub struct CompressionTask {
    command_tx: mpsc::UnboundedSender<CompressionCommand>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl CompressionTask {
    pub fn spawn(engine: Arc<CompressionEngine>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let interval = engine.config().interval;

        let handle = tokio::spawn(async move {
            run_compression_loop(engine, command_rx).await;
        });

        info!(interval_ms = interval.as_millis() as u64, "Compression task spawned");

        Self {
            command_tx,
            handle: Some(handle),
        }
    }

    pub fn trigger(&self) {
        let _ = self.command_tx.send(CompressionCommand::Trigger);
    }

    pub fn pause(&self) {
        let _ = self.command_tx.send(CompressionCommand::Pause);
    }

    pub fn resume(&self) {
        let _ = self.command_tx.send(CompressionCommand::Resume);
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(mut self) {
        let _ = self.command_tx.send(CompressionCommand::Shutdown);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Compression task shutdown error");
            } else {
                info!("Compression task shutdown complete");
            }
        }
    }
}

async fn run_compression_loop(
    engine: Arc<CompressionEngine>,
    mut command_rx: mpsc::UnboundedReceiver<CompressionCommand>,
) {
    let period = engine.config().interval;
    let mut active = true;

    // First pass one full period after start
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if active {
                    engine.run_pass();
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(CompressionCommand::Trigger) => {
                        debug!("Manual compression trigger");
                        engine.run_pass();
                    }
                    Some(CompressionCommand::Pause) => {
                        info!("Compression task paused");
                        active = false;
                    }
                    Some(CompressionCommand::Resume) => {
                        info!("Compression task resumed");
                        active = true;
                    }
                    Some(CompressionCommand::Shutdown) | None => {
                        info!("Compression task shutting down");
                        break;
                    }
                }
            }
        }
    }
}

impl Drop for CompressionTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.command_tx.send(CompressionCommand::Shutdown);
        }
    }
}
