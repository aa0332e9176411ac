//! Control data channel
//!
//! Wraps the WebRTC data channel that carries JSON control traffic. The
//! channel is ordered and reliable; inbound messages preserve the remote
//! sender's transmission order.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

use crate::events::ClientEvent;
use crate::{Error, Result};

/// Control channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Channel is being negotiated
    Connecting,
    /// Channel is open and ready for events
    Open,
    /// Channel is closing
    Closing,
    /// Channel is closed
    Closed,
}

/// Destination for outbound client events
///
/// The dispatcher writes through this seam so tests can capture outbound
/// traffic without a live peer connection.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Send one client event over the control channel
    async fn send_event(&self, event: &ClientEvent) -> Result<()>;
}

/// Ordered, reliable JSON control channel over WebRTC
#[derive(Clone)]
pub struct ControlChannel {
    label: String,
    rtc_channel: Arc<RTCDataChannel>,
    state: Arc<RwLock<ChannelState>>,
    messages_sent: Arc<RwLock<u64>>,
    messages_received: Arc<RwLock<u64>>,
}

impl ControlChannel {
    /// Create the control channel on a peer connection
    ///
    /// Must be called before the offer is generated so the offer's SDP
    /// declares the channel.
    pub async fn create(peer_connection: &RTCPeerConnection, label: &str) -> Result<Self> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };

        let rtc_channel = peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| Error::DataChannel(format!("failed to create channel: {}", e)))?;

        let channel = Self {
            label: label.to_string(),
            rtc_channel,
            state: Arc::new(RwLock::new(ChannelState::Connecting)),
            messages_sent: Arc::new(RwLock::new(0)),
            messages_received: Arc::new(RwLock::new(0)),
        };

        channel.install_close_handlers();
        Ok(channel)
    }

    fn install_close_handlers(&self) {
        let state = Arc::clone(&self.state);
        let label = self.label.clone();
        self.rtc_channel.on_close(Box::new(move || {
            let state = Arc::clone(&state);
            let label = label.clone();
            Box::pin(async move {
                debug!("Control channel '{}' closed", label);
                *state.write().await = ChannelState::Closed;
            })
        }));

        let label = self.label.clone();
        self.rtc_channel.on_error(Box::new(move |err| {
            let label = label.clone();
            Box::pin(async move {
                error!("Control channel '{}' error: {}", label, err);
            })
        }));
    }

    /// Register the open handler
    ///
    /// The channel transitions to `Open` before the handler runs, so
    /// events may be sent from inside it.
    pub fn on_open<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let label = self.label.clone();
        let handler = Arc::new(handler);

        self.rtc_channel.on_open(Box::new(move || {
            let state = Arc::clone(&state);
            let label = label.clone();
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                debug!("Control channel '{}' open", label);
                *state.write().await = ChannelState::Open;
                handler().await;
            })
        }));
    }

    /// Register the inbound message handler
    ///
    /// Payloads are UTF-8 JSON text; anything else is logged and dropped.
    pub fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let messages_received = Arc::clone(&self.messages_received);
        let label = self.label.clone();
        let handler = Arc::new(handler);

        self.rtc_channel.on_message(Box::new(move |msg| {
            let messages_received = Arc::clone(&messages_received);
            let label = label.clone();
            let handler = Arc::clone(&handler);
            let data = msg.data.to_vec();

            Box::pin(async move {
                *messages_received.write().await += 1;
                match String::from_utf8(data) {
                    Ok(text) => handler(text).await,
                    Err(e) => {
                        warn!("Non-UTF-8 payload on channel '{}' dropped: {}", label, e);
                    }
                }
            })
        }));
    }

    /// Get the channel label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get the current state
    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    /// Check if the channel is open
    pub async fn is_open(&self) -> bool {
        *self.state.read().await == ChannelState::Open
    }

    /// Get the number of events sent
    pub async fn messages_sent(&self) -> u64 {
        *self.messages_sent.read().await
    }

    /// Get the number of messages received
    pub async fn messages_received(&self) -> u64 {
        *self.messages_received.read().await
    }

    /// Close the channel; safe to call more than once
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == ChannelState::Closed {
                return Ok(());
            }
            *state = ChannelState::Closing;
        }

        self.rtc_channel
            .close()
            .await
            .map_err(|e| Error::DataChannel(format!("failed to close channel: {}", e)))?;

        *self.state.write().await = ChannelState::Closed;
        debug!("Control channel '{}' closed locally", self.label);
        Ok(())
    }
}

#[async_trait]
impl EventSink for ControlChannel {
    async fn send_event(&self, event: &ClientEvent) -> Result<()> {
        let state = *self.state.read().await;
        if state != ChannelState::Open {
            return Err(Error::DataChannel(format!(
                "channel '{}' is not open (state: {:?})",
                self.label, state
            )));
        }

        let text = event.to_json()?;
        self.rtc_channel
            .send_text(text)
            .await
            .map_err(|e| Error::DataChannel(format!("failed to send event: {}", e)))?;

        *self.messages_sent.write().await += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::api::APIBuilder;
    use webrtc::peer_connection::configuration::RTCConfiguration;

    async fn unconnected_channel() -> (Arc<RTCPeerConnection>, ControlChannel) {
        // A peer connection with no remote end; the channel never opens.
        let api = APIBuilder::new().build();
        let peer_connection = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .unwrap(),
        );
        let channel = ControlChannel::create(&peer_connection, "oai-events")
            .await
            .unwrap();
        (peer_connection, channel)
    }

    #[test]
    fn test_channel_state_transitions_are_distinct() {
        assert_ne!(ChannelState::Connecting, ChannelState::Open);
        assert_ne!(ChannelState::Open, ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_created_channel_starts_connecting() {
        let (peer_connection, channel) = unconnected_channel().await;

        assert_eq!(channel.label(), "oai-events");
        assert_eq!(channel.state().await, ChannelState::Connecting);
        assert!(!channel.is_open().await);

        peer_connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_before_open_is_rejected_and_not_counted() {
        let (peer_connection, channel) = unconnected_channel().await;

        let err = channel
            .send_event(&ClientEvent::ResponseCreate)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataChannel(_)));
        assert_eq!(channel.messages_sent().await, 0);
        assert_eq!(channel.messages_received().await, 0);

        peer_connection.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (peer_connection, channel) = unconnected_channel().await;

        channel.close().await.unwrap();
        assert_eq!(channel.state().await, ChannelState::Closed);
        channel.close().await.unwrap();
        assert_eq!(channel.state().await, ChannelState::Closed);

        peer_connection.close().await.unwrap();
    }
}
