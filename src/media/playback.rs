//! Speaker playback for decoded inbound audio.
//!
//! A shared sample queue bridges the decode loop and a cpal output stream
//! running on its own thread. Playback failure never fails the call; the
//! session can still run analysis-only (e.g. on machines with no output
//! device).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, warn};

use crate::errors::SignalingError;
use crate::media::resample::LinearResampler;

/// Queue cap: about two seconds of audio at the device rate. Anything beyond
/// this is stale; drop the oldest rather than drift further behind.
const MAX_QUEUE_SECONDS: usize = 2;

/// Output stream fed from a shared queue of mono samples.
pub struct Playback {
    queue: Arc<Mutex<VecDeque<f32>>>,
    resampler: Mutex<LinearResampler>,
    stop: Arc<AtomicBool>,
    device_rate: u32,
}

impl Playback {
    /// Open the default output device and start the playback thread.
    ///
    /// `source_rate` is the sample rate of PCM later pushed via
    /// [`Playback::push_pcm`].
    pub fn start(source_rate: u32) -> Result<Self, SignalingError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SignalingError::MediaAccess("no default output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| SignalingError::MediaAccess(e.to_string()))?;

        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(SignalingError::MediaAccess(format!(
                "unsupported output sample format {:?}",
                config.sample_format()
            )));
        }

        let device_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();
        {
            let queue = queue.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let stream = device.build_output_stream(
                    &config.into(),
                    move |data: &mut [f32], _| {
                        let mut q = queue.lock().expect("playback queue poisoned");
                        for frame in data.chunks_mut(channels) {
                            let sample = q.pop_front().unwrap_or(0.0);
                            for out in frame {
                                *out = sample;
                            }
                        }
                    },
                    |e| warn!("Playback stream error: {}", e),
                    None,
                );

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
                debug!("Playback thread stopped");
            });
        }

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SignalingError::MediaAccess(e)),
            Err(_) => {
                return Err(SignalingError::MediaAccess("playback startup timed out".into()))
            }
        }

        Ok(Self {
            queue,
            resampler: Mutex::new(LinearResampler::new(source_rate, device_rate)),
            stop,
            device_rate,
        })
    }

    /// Queue decoded mono PCM for playback.
    pub fn push_pcm(&self, pcm: &[i16]) {
        let samples: Vec<f32> = pcm.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
        let resampled = self.resampler.lock().expect("resampler poisoned").process(&samples);

        let mut q = self.queue.lock().expect("playback queue poisoned");
        let cap = self.device_rate as usize * MAX_QUEUE_SECONDS;
        q.extend(resampled);
        while q.len() > cap {
            q.pop_front();
        }
    }

    /// Stop the playback thread and release the device.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
