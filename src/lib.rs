//! Realtime voice session client
//!
//! This crate negotiates a WebRTC session with a realtime voice API,
//! streams microphone audio up and remote speech back, and exchanges
//! JSON control events over a data channel. The remote model may invoke
//! local device tools (battery level, screen brightness); results travel
//! back over the same channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  SessionController (start / stop lifecycle)          │
//! │  ├─ CredentialIssuer (ephemeral bearer token)        │
//! │  ├─ negotiate (offer/answer over HTTP, ICE)          │
//! │  │   ├─ MicrophoneTrack (Opus, mutable mute)         │
//! │  │   ├─ RemoteStream (inbound audio sink)            │
//! │  │   └─ ControlChannel ("oai-events" data channel)   │
//! │  └─ EventDispatcher (single ordered queue)           │
//! │      └─ ToolRegistry (local capabilities)            │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use voicelink::{
//!     HttpCredentialIssuer, SessionConfig, SessionController, ToolRegistry,
//! };
//!
//! # async fn example() -> voicelink::Result<()> {
//! let config = SessionConfig::default();
//! let issuer = Arc::new(HttpCredentialIssuer::new(
//!     config.issuer_url.clone(),
//!     Duration::from_secs(config.http_timeout_secs),
//! )?);
//! let registry = Arc::new(ToolRegistry::new());
//!
//! let controller = SessionController::new(config, issuer, registry);
//! controller.start().await?;
//! // ... converse ...
//! controller.stop().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channel;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod negotiate;
pub mod session;
pub mod tools;

pub use channel::{ChannelState, ControlChannel, EventSink};
pub use config::{SessionConfig, CONTROL_CHANNEL_LABEL, DEFAULT_MODEL, DEFAULT_REALTIME_URL};
pub use credentials::{CredentialIssuer, EphemeralCredential, HttpCredentialIssuer};
pub use dispatch::{ChannelSignal, DispatchPolicy, EventDispatcher};
pub use error::{Error, Result};
pub use events::{ClientEvent, InboundEvent, ServerEvent, SessionSettings};
pub use negotiate::{MicrophoneTrack, RemoteStream, Session};
pub use session::SessionController;
pub use tools::{
    BatteryLevelTool, DeviceServices, ScreenBrightnessTool, Tool, ToolDescriptor, ToolOutcome,
    ToolRegistry,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
