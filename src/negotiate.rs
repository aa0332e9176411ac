//! Session negotiation
//!
//! Establishes one realtime session: credential fetch, peer connection,
//! local audio track, control channel, offer/answer exchange over HTTP,
//! remote track sink. Every step may fail independently; a failure tears
//! down anything partially constructed, so no partial session is ever
//! exposed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::channel::ControlChannel;
use crate::config::SessionConfig;
use crate::credentials::{CredentialIssuer, EphemeralCredential};
use crate::{Error, Result};

/// Local microphone audio source
///
/// The host feeds encoded Opus samples through [`write_sample`]; while
/// muted, samples are silently discarded so the dispatcher can suppress
/// acoustic echo during remote audio playback.
///
/// Voice-only policy: this is the only local track the negotiator ever
/// attaches; no video capture exists to disable.
///
/// [`write_sample`]: MicrophoneTrack::write_sample
pub struct MicrophoneTrack {
    track: Arc<TrackLocalStaticSample>,
    muted: AtomicBool,
}

impl MicrophoneTrack {
    pub(crate) fn new(sample_rate: u32, channels: u16) -> Arc<Self> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: sample_rate,
                channels,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            "microphone".to_string(),
            "voicelink-local".to_string(),
        ));

        Arc::new(Self {
            track,
            muted: AtomicBool::new(false),
        })
    }

    /// Mute or unmute the microphone
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    /// Check whether the microphone is muted
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Write one audio sample; discarded while muted
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if self.is_muted() {
            return Ok(());
        }
        self.track
            .write_sample(sample)
            .await
            .map_err(|e| Error::MediaTrack(format!("failed to write sample: {}", e)))
    }

    fn local_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }
}

/// Persistent sink for inbound remote media tracks
///
/// Every remote track is appended here, so the UI binds to one stable
/// handle regardless of how many tracks arrive.
#[derive(Clone)]
pub struct RemoteStream {
    tracks: Arc<RwLock<Vec<Arc<TrackRemote>>>>,
}

impl RemoteStream {
    fn new() -> Self {
        Self {
            tracks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    async fn push(&self, track: Arc<TrackRemote>) {
        self.tracks.write().await.push(track);
    }

    /// Number of remote tracks received so far
    pub async fn track_count(&self) -> usize {
        self.tracks.read().await.len()
    }

    /// Snapshot of the received remote tracks
    pub async fn tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.tracks.read().await.clone()
    }
}

/// An established realtime session
///
/// Either fully established (connection plus channel) or absent; the
/// negotiator never hands out a partially-initialized session.
pub struct Session {
    id: String,
    peer_connection: Arc<RTCPeerConnection>,
    channel: ControlChannel,
    microphone: Arc<MicrophoneTrack>,
    remote_stream: RemoteStream,
}

impl Session {
    /// Unique identifier of this session instance
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The control channel
    pub fn channel(&self) -> &ControlChannel {
        &self.channel
    }

    /// The local microphone track
    pub fn microphone(&self) -> Arc<MicrophoneTrack> {
        Arc::clone(&self.microphone)
    }

    /// The remote media sink
    pub fn remote_stream(&self) -> RemoteStream {
        self.remote_stream.clone()
    }

    /// Current peer connection state
    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.peer_connection.connection_state()
    }

    /// Close channel and connection; safe to call more than once
    pub async fn close(&self) -> Result<()> {
        self.channel.close().await?;
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::Negotiation(format!("failed to close connection: {}", e)))?;
        Ok(())
    }
}

/// Establish a session against the configured realtime endpoint
pub async fn start_session(
    config: &SessionConfig,
    issuer: &dyn CredentialIssuer,
) -> Result<Session> {
    config.validate()?;

    let credential = issuer.issue().await?;
    let peer_connection = build_peer_connection().await?;

    match negotiate(config, &credential, &peer_connection).await {
        Ok((channel, microphone, remote_stream)) => {
            let session = Session {
                id: uuid::Uuid::new_v4().to_string(),
                peer_connection,
                channel,
                microphone,
                remote_stream,
            };
            info!(session_id = %session.id, "Session established");
            Ok(session)
        }
        Err(err) => {
            // No partial session escapes: tear the connection down before
            // surfacing the failure.
            let _ = peer_connection.close().await;
            Err(err)
        }
    }
}

async fn build_peer_connection() -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| Error::WebRtc(format!("failed to register codecs: {}", e)))?;

    let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
        .map_err(|e| Error::WebRtc(format!("failed to register interceptors: {}", e)))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .build();

    // Default configuration: no custom ICE server list.
    let peer_connection = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .map_err(|e| Error::Negotiation(format!("failed to create peer connection: {}", e)))?;

    Ok(Arc::new(peer_connection))
}

async fn negotiate(
    config: &SessionConfig,
    credential: &EphemeralCredential,
    peer_connection: &Arc<RTCPeerConnection>,
) -> Result<(ControlChannel, Arc<MicrophoneTrack>, RemoteStream)> {
    peer_connection.on_peer_connection_state_change(Box::new(
        move |state: RTCPeerConnectionState| {
            Box::pin(async move {
                debug!("Peer connection state: {}", state);
            })
        },
    ));

    let microphone = MicrophoneTrack::new(48_000, 1);
    peer_connection
        .add_track(microphone.local_track() as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .map_err(|e| Error::MediaTrack(format!("failed to add audio track: {}", e)))?;

    let remote_stream = RemoteStream::new();
    {
        let remote_stream = remote_stream.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let remote_stream = remote_stream.clone();
            Box::pin(async move {
                debug!("Remote track received: kind={}", track.kind());
                remote_stream.push(track).await;
            })
        }));
    }

    // The channel must exist before the offer so the offer's SDP
    // declares it.
    let channel = ControlChannel::create(peer_connection, &config.channel_label).await?;

    let offer = peer_connection
        .create_offer(None)
        .await
        .map_err(|e| Error::Negotiation(format!("failed to create offer: {}", e)))?;

    let mut gather_complete = peer_connection.gathering_complete_promise().await;
    peer_connection
        .set_local_description(offer)
        .await
        .map_err(|e| Error::Negotiation(format!("failed to set local description: {}", e)))?;

    // Non-trickle endpoint: the POSTed offer must carry all candidates.
    let gather_timeout = Duration::from_secs(config.ice_gathering_timeout_secs);
    if tokio::time::timeout(gather_timeout, gather_complete.recv())
        .await
        .is_err()
    {
        return Err(Error::Negotiation("ICE gathering timed out".to_string()));
    }

    let local_description = peer_connection.local_description().await.ok_or_else(|| {
        Error::Negotiation("no local description after setting offer".to_string())
    })?;

    let answer_sdp = exchange_sdp(config, credential, &local_description.sdp).await?;

    let answer = RTCSessionDescription::answer(answer_sdp)
        .map_err(|e| Error::Negotiation(format!("failed to parse answer: {}", e)))?;
    peer_connection
        .set_remote_description(answer)
        .await
        .map_err(|e| Error::Negotiation(format!("failed to set remote description: {}", e)))?;

    Ok((channel, microphone, remote_stream))
}

/// POST the offer SDP and return the raw answer SDP body
async fn exchange_sdp(
    config: &SessionConfig,
    credential: &EphemeralCredential,
    offer_sdp: &str,
) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .map_err(|e| Error::Negotiation(format!("failed to build HTTP client: {}", e)))?;

    let url = config.negotiation_url();
    debug!("POSTing offer to {}", url);

    let response = client
        .post(&url)
        .bearer_auth(credential.bearer())
        .header(reqwest::header::CONTENT_TYPE, "application/sdp")
        .body(offer_sdp.to_string())
        .send()
        .await
        .map_err(|e| Error::Negotiation(format!("negotiation endpoint unreachable: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Negotiation(format!(
            "negotiation endpoint returned status {}",
            status
        )));
    }

    // The answer arrives as a raw SDP body, not JSON.
    let answer = response
        .text()
        .await
        .map_err(|e| Error::Negotiation(format!("failed to read answer body: {}", e)))?;

    if answer.trim().is_empty() {
        return Err(Error::Negotiation("empty SDP answer".to_string()));
    }
    Ok(answer)
}
