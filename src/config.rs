//! Configuration types for the voice session core

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default realtime negotiation endpoint
pub const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

/// Default realtime model identifier
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Label of the control data channel; must be created before the offer
/// so the offer's SDP declares it
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

/// Default instruction string advertised in `session.update`
pub const DEFAULT_INSTRUCTIONS: &str =
    "You are a helpful voice assistant running on a user's device. You can \
     read the device battery level and change the screen brightness when asked.";

/// Main configuration for a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Credential issuer URL (POST, empty body, returns the ephemeral token)
    pub issuer_url: String,

    /// Realtime negotiation base URL (offer/answer exchange)
    pub realtime_url: String,

    /// Model identifier appended as the `model` query parameter
    pub model: String,

    /// Instruction string describing available capabilities
    pub instructions: String,

    /// Voice preset requested in `session.update`; `None` defers to the
    /// issuer-side session defaults
    pub voice: Option<String>,

    /// Control data channel label (default: "oai-events")
    pub channel_label: String,

    /// Send a `response.create` trigger after each tool output
    /// (default: true)
    pub trigger_response_after_tool: bool,

    /// Mute the local microphone while the remote side is emitting audio.
    /// Mitigation for platforms where speaker output re-enters the
    /// microphone (default: false)
    pub echo_mitigation: bool,

    /// Number of unrecognized events retained for observability
    /// (default: 32)
    pub event_log_capacity: usize,

    /// ICE gathering timeout in seconds (default: 10)
    pub ice_gathering_timeout_secs: u64,

    /// HTTP timeout in seconds for issuer and negotiation calls
    /// (default: 15)
    pub http_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            issuer_url: "http://127.0.0.1:54321/functions/v1/token".to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            voice: None,
            channel_label: CONTROL_CHANNEL_LABEL.to_string(),
            trigger_response_after_tool: true,
            echo_mitigation: false,
            event_log_capacity: 32,
            ice_gathering_timeout_secs: 10,
            http_timeout_secs: 15,
        }
    }
}

impl SessionConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if any URL is empty or not HTTP(S),
    /// the model or channel label is empty, or a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if !is_http_url(&self.issuer_url) {
            return Err(Error::InvalidConfig(format!(
                "issuer_url must be an http(s) URL, got '{}'",
                self.issuer_url
            )));
        }
        if !is_http_url(&self.realtime_url) {
            return Err(Error::InvalidConfig(format!(
                "realtime_url must be an http(s) URL, got '{}'",
                self.realtime_url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(Error::InvalidConfig("model must not be empty".to_string()));
        }
        if self.channel_label.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "channel_label must not be empty".to_string(),
            ));
        }
        if self.event_log_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_log_capacity must be at least 1".to_string(),
            ));
        }
        if self.ice_gathering_timeout_secs == 0 || self.http_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Full negotiation URL including the model query parameter
    pub fn negotiation_url(&self) -> String {
        format!("{}?model={}", self.realtime_url, self.model)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
