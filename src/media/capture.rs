//! Local microphone capture feeding the outbound WebRTC track.
//!
//! cpal streams are not `Send`, so the device stream lives on a dedicated
//! thread that forwards f32 frames into the async side, where they are
//! downmixed, resampled to 48 kHz, Opus-encoded, and written to the track.
//! The mute gate drops frames at the source; the remote side simply stops
//! receiving audio, which is how the call is silenced once the agent has
//! asked to hang up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audiopus::coder::Encoder;
use audiopus::{Application, Channels, SampleRate};
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::errors::SignalingError;
use crate::media::resample::{downmix, LinearResampler};

/// Samples per 20 ms Opus frame at 48 kHz mono.
const FRAME_SAMPLES: usize = 960;
const OPUS_SAMPLE_RATE: u32 = 48_000;
const MAX_OPUS_FRAME_BYTES: usize = 4000;

/// List the names of all available input devices.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            warn!("Failed to enumerate input devices: {}", e);
            Vec::new()
        }
    }
}

/// A running microphone capture bound to one outbound track.
pub struct CaptureStream {
    /// When set, captured frames are dropped before encoding.
    mute: Arc<AtomicBool>,
    /// When set, the capture thread drops the device stream and exits.
    stop: Arc<AtomicBool>,
    /// The Opus track attached to the peer connection.
    pub track: Arc<TrackLocalStaticSample>,
}

impl CaptureStream {
    /// Open the requested input device and start capturing.
    ///
    /// Blocking: builds the device stream on a dedicated thread and waits
    /// for it to report ready. Call via `spawn_blocking` from async code.
    /// Fails with `MediaAccess` when the named device is absent or the
    /// stream cannot be opened.
    pub fn open(device_id: Option<&str>) -> Result<Self, SignalingError> {
        let host = cpal::default_host();

        let device = match device_id {
            Some(want) => host
                .input_devices()
                .map_err(|e| SignalingError::MediaAccess(e.to_string()))?
                .find(|d| d.name().map(|n| n == want).unwrap_or(false))
                .ok_or_else(|| {
                    SignalingError::MediaAccess(format!("input device '{}' not found", want))
                })?,
            None => host.default_input_device().ok_or_else(|| {
                SignalingError::MediaAccess("no default input device".to_string())
            })?,
        };

        let config = device
            .default_input_config()
            .map_err(|e| SignalingError::MediaAccess(e.to_string()))?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        debug!(
            "Capture device '{}' at {} Hz, {} channel(s)",
            device.name().unwrap_or_else(|_| "?".into()),
            sample_rate,
            channels
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "voxlink-mic".to_owned(),
        ));

        let mute = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Vec<f32>>();

        Self::spawn_device_thread(device, config, frame_tx, mute.clone(), stop.clone())?;
        Self::spawn_encoder(frame_rx, track.clone(), channels, sample_rate)?;

        Ok(Self { mute, stop, track })
    }

    /// Handle used by the event handler to mute capture without owning `self`.
    pub fn mute_handle(&self) -> Arc<AtomicBool> {
        self.mute.clone()
    }

    pub fn set_muted(&self, muted: bool) {
        self.mute.store(muted, Ordering::Relaxed);
    }

    /// Stop the capture thread and release the device.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Run the cpal stream on its own thread, pushing f32 frames out.
    fn spawn_device_thread(
        device: cpal::Device,
        config: cpal::SupportedStreamConfig,
        frame_tx: mpsc::UnboundedSender<Vec<f32>>,
        mute: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
    ) -> Result<(), SignalingError> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), String>>();

        std::thread::spawn(move || {
            let err_fn = |e| warn!("Capture stream error: {}", e);
            let push = move |samples: Vec<f32>| {
                if !mute.load(Ordering::Relaxed) {
                    let _ = frame_tx.send(samples);
                }
            };

            let stream = match config.sample_format() {
                cpal::SampleFormat::F32 => device.build_input_stream(
                    &config.into(),
                    move |data: &[f32], _| push(data.to_vec()),
                    err_fn,
                    None,
                ),
                cpal::SampleFormat::I16 => device.build_input_stream(
                    &config.into(),
                    move |data: &[i16], _| {
                        push(data.iter().map(|&s| s as f32 / i16::MAX as f32).collect())
                    },
                    err_fn,
                    None,
                ),
                cpal::SampleFormat::U16 => device.build_input_stream(
                    &config.into(),
                    move |data: &[u16], _| {
                        push(data.iter().map(|&s| s as f32 / u16::MAX as f32 * 2.0 - 1.0).collect())
                    },
                    err_fn,
                    None,
                ),
                other => {
                    let _ = ready_tx.send(Err(format!("unsupported sample format {:?}", other)));
                    return;
                }
            };

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
            debug!("Capture thread stopped");
        });

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SignalingError::MediaAccess(e)),
            Err(_) => Err(SignalingError::MediaAccess("capture stream startup timed out".into())),
        }
    }

    /// Downmix, resample, Opus-encode, and write 20 ms samples to the track.
    fn spawn_encoder(
        mut frame_rx: mpsc::UnboundedReceiver<Vec<f32>>,
        track: Arc<TrackLocalStaticSample>,
        channels: usize,
        sample_rate: u32,
    ) -> Result<(), SignalingError> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(|e| SignalingError::MediaAccess(format!("Opus encoder: {}", e)))?;

        tokio::spawn(async move {
            let mut resampler = LinearResampler::new(sample_rate, OPUS_SAMPLE_RATE);
            let mut pending: Vec<f32> = Vec::with_capacity(FRAME_SAMPLES * 2);
            let mut opus_buf = vec![0u8; MAX_OPUS_FRAME_BYTES];

            while let Some(frame) = frame_rx.recv().await {
                let mono = downmix(&frame, channels);
                pending.extend(resampler.process(&mono));

                while pending.len() >= FRAME_SAMPLES {
                    let chunk: Vec<i16> = pending
                        .drain(..FRAME_SAMPLES)
                        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect();

                    let len = match encoder.encode(&chunk, &mut opus_buf) {
                        Ok(n) => n,
                        Err(e) => {
                            warn!("Opus encode failed: {}", e);
                            continue;
                        }
                    };

                    let sample = Sample {
                        data: Bytes::copy_from_slice(&opus_buf[..len]),
                        duration: Duration::from_millis(20),
                        ..Default::default()
                    };
                    if track.write_sample(&sample).await.is_err() {
                        // Track is gone; the connection is closing.
                        break;
                    }
                }
            }
            debug!("Capture encoder stopped");
        });

        Ok(())
    }
}
