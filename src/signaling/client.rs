//! WebRTC negotiation against the realtime endpoint.
//!
//! The handshake is direct and trickle-free: no STUN/TURN servers are
//! configured, the data channel and local track are created before the
//! offer, and the complete offer (all candidates gathered) is exchanged for
//! an answer in one HTTP round trip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use audiopus::coder::Decoder;
use audiopus::packet::Packet;
use audiopus::{Channels, MutSignals, SampleRate};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::SessionConfig;
use crate::errors::{SessionError, SignalingError};
use crate::media::{CaptureStream, LevelMeter, Playback};
use crate::protocol::ClientEvent;
use crate::signaling::control_plane::ControlPlaneClient;

/// Default realtime signaling endpoint.
pub const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

/// Label of the single bidirectional control channel.
const CONTROL_CHANNEL_LABEL: &str = "oai-events";

/// Sample rate of decoded inbound audio.
const DECODE_SAMPLE_RATE: u32 = 48_000;

/// Upper bound on decoded samples per Opus frame (120 ms at 48 kHz).
const MAX_DECODED_SAMPLES: usize = 5760;

/// Negotiates connections: credential, peer connection, SDP exchange.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    control_plane: ControlPlaneClient,
    realtime_url: String,
    http: reqwest::Client,
}

impl SignalingClient {
    pub fn new(control_plane: ControlPlaneClient) -> Self {
        Self::with_realtime_url(control_plane, DEFAULT_REALTIME_URL)
    }

    pub fn with_realtime_url(control_plane: ControlPlaneClient, realtime_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .expect("HTTP client construction cannot fail with static options");
        Self {
            control_plane,
            realtime_url: realtime_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn control_plane(&self) -> &ControlPlaneClient {
        &self.control_plane
    }

    /// Establish a connection for `config`.
    ///
    /// The credential is requested first; on failure no channel is created
    /// and no capture device is touched. Any later failure tears down
    /// everything built so far before returning.
    pub async fn negotiate(&self, config: &SessionConfig) -> Result<Connection, SignalingError> {
        let credential =
            self.control_plane.create_credential(&config.model, &config.voice).await?;
        debug!("Credential obtained for model {}", config.model);

        let pc = build_peer_connection().await?;

        // Control channel before the offer so it is part of the only
        // offer/answer round this connection will ever do.
        let control = match pc.create_data_channel(CONTROL_CHANNEL_LABEL, None).await {
            Ok(dc) => dc,
            Err(e) => {
                let _ = pc.close().await;
                return Err(SignalingError::negotiation(e));
            }
        };
        let (open_rx, inbound_rx) = wire_control_channel(&control);

        // Local capture, attached before the offer; no renegotiation later.
        let device_id = config.microphone_id.clone();
        let capture = match tokio::task::spawn_blocking(move || {
            CaptureStream::open(device_id.as_deref())
        })
        .await
        {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => {
                let _ = pc.close().await;
                return Err(e);
            }
            Err(join_err) => {
                let _ = pc.close().await;
                return Err(SignalingError::MediaAccess(join_err.to_string()));
            }
        };

        if let Err(e) = attach_capture(&pc, &capture).await {
            capture.stop();
            let _ = pc.close().await;
            return Err(e);
        }

        let level = Arc::new(LevelMeter::new());
        let playback = match tokio::task::spawn_blocking(|| Playback::start(DECODE_SAMPLE_RATE))
            .await
        {
            Ok(Ok(p)) => Some(Arc::new(p)),
            Ok(Err(e)) => {
                warn!("Playback unavailable, running analysis-only: {}", e);
                None
            }
            Err(e) => {
                warn!("Playback startup task failed: {}", e);
                None
            }
        };
        wire_remote_audio(&pc, level.clone(), playback.clone());

        if let Err(e) = self.exchange_sdp(&pc, &config.model, &credential).await {
            capture.stop();
            if let Some(p) = &playback {
                p.stop();
            }
            let _ = pc.close().await;
            return Err(e);
        }

        info!("Negotiation complete for model {}", config.model);
        Ok(Connection {
            pc,
            control,
            capture,
            level,
            playback,
            open_rx,
            inbound: StdMutex::new(Some(inbound_rx)),
            closed: AtomicBool::new(false),
        })
    }

    /// Steps (e)–(g): local offer, HTTP SDP exchange, remote answer.
    async fn exchange_sdp(
        &self,
        pc: &Arc<RTCPeerConnection>,
        model: &str,
        credential: &str,
    ) -> Result<(), SignalingError> {
        let offer = pc.create_offer(None).await.map_err(SignalingError::negotiation)?;

        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.map_err(SignalingError::negotiation)?;
        let _ = gathered.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| SignalingError::negotiation("local description missing"))?;

        let url = format!("{}?model={}", self.realtime_url, model);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", credential))
            .header("Content-Type", "application/sdp")
            .body(local.sdp)
            .send()
            .await
            .map_err(SignalingError::negotiation)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SignalingError::Negotiation(format!(
                "SDP exchange returned HTTP {}: {}",
                status, body
            )));
        }

        let answer_sdp = resp.text().await.map_err(SignalingError::negotiation)?;
        let answer =
            RTCSessionDescription::answer(answer_sdp).map_err(SignalingError::negotiation)?;
        pc.set_remote_description(answer).await.map_err(SignalingError::negotiation)?;
        Ok(())
    }
}

/// Peer connection with an empty ICE server list (direct negotiation).
async fn build_peer_connection() -> Result<Arc<RTCPeerConnection>, SignalingError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().map_err(SignalingError::negotiation)?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(SignalingError::negotiation)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration { ice_servers: vec![], ..Default::default() };
    let pc = api.new_peer_connection(config).await.map_err(SignalingError::negotiation)?;
    Ok(Arc::new(pc))
}

/// Wire the control channel's open flag and inbound frame stream.
fn wire_control_channel(
    control: &Arc<RTCDataChannel>,
) -> (watch::Receiver<bool>, mpsc::UnboundedReceiver<String>) {
    let (open_tx, open_rx) = watch::channel(false);
    control.on_open(Box::new(move || {
        info!("Control channel open");
        let _ = open_tx.send(true);
        Box::pin(async {})
    }));

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
    control.on_message(Box::new(move |msg: DataChannelMessage| {
        if msg.is_string {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = inbound_tx.send(text);
                }
                Err(e) => warn!("Dropping non-UTF-8 control frame: {}", e),
            }
        }
        Box::pin(async {})
    }));

    (open_rx, inbound_rx)
}

/// Add the capture track and drain its RTCP feedback.
async fn attach_capture(
    pc: &Arc<RTCPeerConnection>,
    capture: &CaptureStream,
) -> Result<(), SignalingError> {
    let sender = pc
        .add_track(capture.track.clone() as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(SignalingError::negotiation)?;

    tokio::spawn(async move {
        let mut rtcp_buf = vec![0u8; 1500];
        while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
    });
    Ok(())
}

/// Decode inbound audio into the level meter (and playback when available).
fn wire_remote_audio(
    pc: &Arc<RTCPeerConnection>,
    level: Arc<LevelMeter>,
    playback: Option<Arc<Playback>>,
) {
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let level = level.clone();
        let playback = playback.clone();
        Box::pin(async move {
            if track.kind() != RTPCodecType::Audio {
                return;
            }
            info!("Remote audio track attached");
            tokio::spawn(decode_loop(track, level, playback));
        })
    }));
}

async fn decode_loop(track: Arc<TrackRemote>, level: Arc<LevelMeter>, playback: Option<Arc<Playback>>) {
    let mut decoder = match Decoder::new(SampleRate::Hz48000, Channels::Mono) {
        Ok(d) => d,
        Err(e) => {
            warn!("Opus decoder init failed: {}", e);
            return;
        }
    };
    let mut pcm = vec![0i16; MAX_DECODED_SAMPLES];

    while let Ok((rtp, _)) = track.read_rtp().await {
        if rtp.payload.is_empty() {
            continue;
        }
        let packet: Packet = match audiopus::TryInto::try_into(&rtp.payload[..]) {
            Ok(p) => p,
            Err(e) => {
                warn!("Bad Opus packet: {}", e);
                continue;
            }
        };
        let mut signals: MutSignals<i16> = match audiopus::TryInto::try_into(&mut pcm[..]) {
            Ok(s) => s,
            Err(e) => {
                warn!("Decode buffer error: {}", e);
                continue;
            }
        };
        match decoder.decode(Some(&packet), &mut signals, false) {
            Ok(n) => {
                level.push_frame(&pcm[..n]);
                if let Some(pb) = &playback {
                    pb.push_pcm(&pcm[..n]);
                }
            }
            Err(e) => warn!("Opus decode failed: {}", e),
        }
    }
    debug!("Remote audio track ended");
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One negotiated connection: peer connection, control channel, media.
pub struct Connection {
    pc: Arc<RTCPeerConnection>,
    control: Arc<RTCDataChannel>,
    capture: CaptureStream,
    level: Arc<LevelMeter>,
    playback: Option<Arc<Playback>>,
    open_rx: watch::Receiver<bool>,
    inbound: StdMutex<Option<mpsc::UnboundedReceiver<String>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wait for the control channel to report open.
    pub async fn wait_channel_open(&self, timeout: Duration) -> Result<(), SessionError> {
        let mut rx = self.open_rx.clone();
        let wait = async {
            loop {
                if *rx.borrow() {
                    return Ok(());
                }
                if rx.changed().await.is_err() {
                    return Err(SessionError::ChannelNotOpen("channel closed".into()));
                }
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(res) => res,
            Err(_) => Err(SessionError::ChannelNotOpen(format!(
                "no open signal within {:?}",
                timeout
            ))),
        }
    }

    /// Send a protocol event over the control channel.
    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), SignalingError> {
        let json = serde_json::to_string(event).map_err(SignalingError::negotiation)?;
        self.control.send_text(json).await.map_err(SignalingError::negotiation)?;
        Ok(())
    }

    /// Take the inbound frame stream. Yields `Some` exactly once.
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.inbound.lock().expect("inbound receiver poisoned").take()
    }

    /// Mute gate for the local capture stream.
    pub fn mute_handle(&self) -> Arc<AtomicBool> {
        self.capture.mute_handle()
    }

    /// Meter over decoded inbound audio.
    pub fn level_meter(&self) -> Arc<LevelMeter> {
        self.level.clone()
    }

    /// Release every resource this connection holds.
    ///
    /// Safe to call more than once and safe when parts are already gone;
    /// teardown treats absence as success.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.capture.stop();
        if let Some(p) = &self.playback {
            p.stop();
        }
        if let Err(e) = self.control.close().await {
            debug!("Control channel close: {}", e);
        }
        if let Err(e) = self.pc.close().await {
            debug!("Peer connection close: {}", e);
        }
        info!("Connection released");
    }
}
