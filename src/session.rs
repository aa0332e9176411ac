//! Session lifecycle
//!
//! One controller owns at most one active session. `start` on an active
//! controller is an explicit error; `stop` on an idle controller is a
//! no-op. Stopping signals the dispatcher queue instead of aborting the
//! task, so an in-flight tool invocation runs to completion.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::config::SessionConfig;
use crate::credentials::CredentialIssuer;
use crate::dispatch::{attach, ChannelSignal, DispatchPolicy, EventDispatcher};
use crate::negotiate::{start_session, RemoteStream, Session};
use crate::tools::ToolRegistry;
use crate::{Error, Result};

struct ActiveSession {
    session: Session,
    dispatcher: Arc<EventDispatcher>,
    pump: JoinHandle<()>,
    signals: mpsc::Sender<ChannelSignal>,
}

/// Owns the lifecycle of a single voice session
pub struct SessionController {
    config: SessionConfig,
    issuer: Arc<dyn CredentialIssuer>,
    registry: Arc<ToolRegistry>,
    active: RwLock<Option<ActiveSession>>,
}

impl SessionController {
    /// Create an idle controller
    pub fn new(
        config: SessionConfig,
        issuer: Arc<dyn CredentialIssuer>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            config,
            issuer,
            registry,
            active: RwLock::new(None),
        }
    }

    /// The controller's configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Check whether a session is currently active
    pub async fn is_active(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Identifier of the active session, if any
    pub async fn session_id(&self) -> Option<String> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|a| a.session.id().to_string())
    }

    /// Peer connection state of the active session, if any
    pub async fn connection_state(&self) -> Option<RTCPeerConnectionState> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|a| a.session.connection_state())
    }

    /// Latest transcript; empty while idle
    pub async fn transcript(&self) -> String {
        match self.active.read().await.as_ref() {
            Some(active) => active.dispatcher.transcript().await,
            None => String::new(),
        }
    }

    /// Unrecognized event types seen by the active session
    pub async fn recent_events(&self) -> Vec<String> {
        match self.active.read().await.as_ref() {
            Some(active) => active.dispatcher.recent_events().await,
            None => Vec::new(),
        }
    }

    /// Remote media sink of the active session, if any
    pub async fn remote_stream(&self) -> Option<RemoteStream> {
        self.active
            .read()
            .await
            .as_ref()
            .map(|a| a.session.remote_stream())
    }

    /// Negotiate and activate a session
    ///
    /// # Errors
    ///
    /// `Error::AlreadyActive` if a session is already running. Any
    /// negotiation failure leaves the controller idle and restartable.
    pub async fn start(&self) -> Result<()> {
        // Hold the slot across negotiation so concurrent starts cannot
        // both succeed.
        let mut active = self.active.write().await;
        if active.is_some() {
            return Err(Error::AlreadyActive);
        }

        let session = start_session(&self.config, self.issuer.as_ref()).await?;

        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&self.registry),
            Arc::new(session.channel().clone()),
            DispatchPolicy::from(&self.config),
            Some(session.microphone()),
        ));
        let (pump, signals) = attach(Arc::clone(&dispatcher), session.channel());

        info!(session_id = %session.id(), "Session started");
        *active = Some(ActiveSession {
            session,
            dispatcher,
            pump,
            signals,
        });
        Ok(())
    }

    /// Stop the active session; a no-op while idle
    pub async fn stop(&self) -> Result<()> {
        let Some(active) = self.active.write().await.take() else {
            debug!("Stop requested with no active session");
            return Ok(());
        };

        let session_id = active.session.id().to_string();
        // Let the dispatcher drain queued signals before it exits.
        let _ = active.signals.send(ChannelSignal::Shutdown).await;

        if let Err(err) = active.session.close().await {
            warn!(session_id = %session_id, "Teardown error: {}", err);
        }
        if active.pump.await.is_err() {
            warn!(session_id = %session_id, "Dispatcher task ended abnormally");
        }

        info!(session_id = %session_id, "Session stopped");
        Ok(())
    }
}
