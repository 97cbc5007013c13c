//! Silence-driven hangup detection.
//!
//! Once the remote agent has asked to end the call, the detector samples the
//! inbound audio level on a fixed cadence. A full second below the
//! near-silence threshold means the agent has finished its goodbye; the
//! detector fires its signal exactly once and stops. Any louder sample
//! resets the accumulated window. The task also exits on its own when the
//! call closes or the termination request is withdrawn, and the controller
//! can hard-stop it at any time via [`SilenceDetector::disarm`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::media::EnergySource;

/// Average energy (0–255 scale) below which a sample counts as silence.
pub const NEAR_SILENCE_THRESHOLD: f32 = 10.0;

/// Sustained silence required before hanging up.
pub const SILENCE_HANGUP_AFTER: Duration = Duration::from_millis(1000);

/// Sampling cadence.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// Periodic silence sampler with its own start/cancel lifecycle.
pub struct SilenceDetector {
    threshold: f32,
    window: Duration,
    interval: Duration,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Default for SilenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SilenceDetector {
    pub fn new() -> Self {
        Self::with_timing(NEAR_SILENCE_THRESHOLD, SILENCE_HANGUP_AFTER, SAMPLE_INTERVAL)
    }

    /// Custom thresholds/timing; used by tests to compress the timeline.
    pub fn with_timing(threshold: f32, window: Duration, interval: Duration) -> Self {
        Self {
            threshold,
            window,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Start sampling. No-op when already armed.
    ///
    /// The loop runs while `live` and `pending` both hold; `signal` fires at
    /// most once, when sustained silence is observed.
    pub fn arm(
        &self,
        source: Arc<dyn EnergySource>,
        live: Arc<AtomicBool>,
        pending: Arc<AtomicBool>,
        signal: oneshot::Sender<()>,
    ) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Silence detector already armed");
            return;
        }

        let running = self.running.clone();
        let threshold = self.threshold;
        let window = self.window;
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut silence_since: Option<Instant> = None;
            let mut signal = Some(signal);

            loop {
                tokio::time::sleep(interval).await;
                if !running.load(Ordering::SeqCst)
                    || !live.load(Ordering::SeqCst)
                    || !pending.load(Ordering::SeqCst)
                {
                    break;
                }

                let energy = source.average_energy();
                if energy < threshold {
                    let since = *silence_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= window {
                        info!("Sustained silence detected, hanging up");
                        if let Some(tx) = signal.take() {
                            let _ = tx.send(());
                        }
                        break;
                    }
                } else {
                    silence_since = None;
                }
            }

            running.store(false, Ordering::SeqCst);
        });

        *self.handle.lock().expect("silence handle poisoned") = Some(handle);
    }

    /// Hard-stop the sampling task.
    pub fn disarm(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.lock().expect("silence handle poisoned").take() {
            h.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
