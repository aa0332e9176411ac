//! Event dispatch
//!
//! All channel callbacks funnel into one ordered queue consumed by a
//! single dispatcher task, so handlers never interleave and tool
//! invocations are serialized in arrival order. The configuration
//! message is sent exactly once per channel lifetime.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{ControlChannel, EventSink};
use crate::config::SessionConfig;
use crate::events::{ClientEvent, InboundEvent, ServerEvent};
use crate::negotiate::MicrophoneTrack;
use crate::tools::ToolRegistry;
use crate::Result;

/// Capacity of the inbound signal queue
const SIGNAL_QUEUE_CAPACITY: usize = 64;

/// Signals delivered to the dispatcher task
#[derive(Debug)]
pub enum ChannelSignal {
    /// The control channel opened
    Opened,
    /// One inbound text message, in transmission order
    Message(String),
    /// Stop dispatching after draining queued signals
    Shutdown,
}

/// Dispatch behavior derived from [`SessionConfig`]
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Instruction string advertised in `session.update`
    pub instructions: String,
    /// Voice preset advertised in `session.update`, if any
    pub voice: Option<String>,
    /// Send `response.create` after each tool output
    pub trigger_response_after_tool: bool,
    /// Mute the microphone during remote audio playback
    pub echo_mitigation: bool,
    /// Bound on the unrecognized-event log
    pub event_log_capacity: usize,
}

impl From<&SessionConfig> for DispatchPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
            trigger_response_after_tool: config.trigger_response_after_tool,
            echo_mitigation: config.echo_mitigation,
            event_log_capacity: config.event_log_capacity,
        }
    }
}

/// Maps inbound protocol events to local side effects and outbound
/// replies
pub struct EventDispatcher {
    registry: Arc<ToolRegistry>,
    sink: Arc<dyn EventSink>,
    policy: DispatchPolicy,
    microphone: Option<Arc<MicrophoneTrack>>,
    transcript: Arc<RwLock<String>>,
    recent_events: Arc<RwLock<VecDeque<String>>>,
    configured: AtomicBool,
}

impl EventDispatcher {
    /// Create a dispatcher writing through the given sink
    pub fn new(
        registry: Arc<ToolRegistry>,
        sink: Arc<dyn EventSink>,
        policy: DispatchPolicy,
        microphone: Option<Arc<MicrophoneTrack>>,
    ) -> Self {
        Self {
            registry,
            sink,
            policy,
            microphone,
            transcript: Arc::new(RwLock::new(String::new())),
            recent_events: Arc::new(RwLock::new(VecDeque::new())),
            configured: AtomicBool::new(false),
        }
    }

    /// Current transcript text
    pub async fn transcript(&self) -> String {
        self.transcript.read().await.clone()
    }

    /// Recently observed unrecognized event types, oldest first
    pub async fn recent_events(&self) -> Vec<String> {
        self.recent_events.read().await.iter().cloned().collect()
    }

    /// Send the session configuration message
    ///
    /// Idempotent per channel lifetime: a duplicate `open` callback is a
    /// no-op. The payload advertises every registered tool descriptor
    /// verbatim.
    pub async fn on_channel_open(&self) -> Result<()> {
        if self.configured.swap(true, Ordering::SeqCst) {
            debug!("Channel re-opened; session configuration already sent");
            return Ok(());
        }

        let update = ClientEvent::session_update(
            self.policy.instructions.clone(),
            self.policy.voice.clone(),
            self.registry.descriptors(),
        );
        match self.sink.send_event(&update).await {
            Ok(()) => {
                info!(
                    "Session configuration advertised ({} tools)",
                    self.registry.len()
                );
                Ok(())
            }
            Err(err) => {
                // A failed send does not consume the one-shot.
                self.configured.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Handle one inbound control-channel message
    ///
    /// Parse failures are logged and dropped; the session stays active.
    pub async fn handle_message(&self, raw: &str) {
        match InboundEvent::parse(raw) {
            Ok(InboundEvent::Known(event)) => self.handle_event(event).await,
            Ok(InboundEvent::Unrecognized { event_type, .. }) => {
                debug!("Unhandled event type '{}'", event_type);
                self.record_event(event_type).await;
            }
            Err(err) => {
                warn!("Dropping malformed message: {}", err);
            }
        }
    }

    async fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::AudioTranscriptDone { transcript } => {
                debug!("Transcript updated ({} chars)", transcript.len());
                *self.transcript.write().await = transcript;
            }
            ServerEvent::FunctionCallArgumentsDone {
                name,
                call_id,
                arguments,
            } => {
                self.handle_tool_call(&name, &call_id, &arguments).await;
            }
            ServerEvent::OutputAudioStarted => {
                if self.policy.echo_mitigation {
                    if let Some(microphone) = &self.microphone {
                        debug!("Remote audio started; muting microphone");
                        microphone.set_muted(true);
                    }
                }
            }
            ServerEvent::OutputAudioStopped => {
                if self.policy.echo_mitigation {
                    if let Some(microphone) = &self.microphone {
                        debug!("Remote audio stopped; unmuting microphone");
                        microphone.set_muted(false);
                    }
                }
            }
        }
    }

    async fn handle_tool_call(&self, name: &str, call_id: &str, arguments: &str) {
        // Unknown tool is a no-op, not an error.
        if self.registry.resolve(name).is_none() {
            debug!("Ignoring call to unknown tool '{}'", name);
            return;
        }

        let args: Value = match serde_json::from_str(arguments) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "Malformed arguments for tool '{}' (call '{}'), aborted: {}",
                    name, call_id, err
                );
                return;
            }
        };

        let Some(outcome) = self.registry.invoke(name, args).await else {
            return;
        };
        if let Some(reason) = outcome.error() {
            debug!("Tool '{}' reported failure: {}", name, reason);
        }

        let output = match outcome.to_output() {
            Ok(output) => output,
            Err(err) => {
                warn!("Could not serialize outcome of tool '{}': {}", name, err);
                return;
            }
        };

        let reply = ClientEvent::function_call_output(call_id, output);
        if let Err(err) = self.sink.send_event(&reply).await {
            warn!(
                "Failed to deliver output for call '{}': {}",
                call_id, err
            );
            return;
        }

        if self.policy.trigger_response_after_tool {
            if let Err(err) = self.sink.send_event(&ClientEvent::ResponseCreate).await {
                warn!("Failed to trigger response after call '{}': {}", call_id, err);
            }
        }
    }

    async fn record_event(&self, event_type: String) {
        let mut recent = self.recent_events.write().await;
        if recent.len() == self.policy.event_log_capacity {
            recent.pop_front();
        }
        recent.push_back(event_type);
    }

    /// Consume signals until the queue closes or `Shutdown` arrives
    ///
    /// Signals are processed strictly in order; a tool invocation
    /// completes before the next message is looked at.
    pub fn spawn(self: Arc<Self>, mut signals: mpsc::Receiver<ChannelSignal>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                match signal {
                    ChannelSignal::Opened => {
                        if let Err(err) = self.on_channel_open().await {
                            warn!("Failed to send session configuration: {}", err);
                        }
                    }
                    ChannelSignal::Message(text) => self.handle_message(&text).await,
                    ChannelSignal::Shutdown => break,
                }
            }
            debug!("Dispatcher stopped");
        })
    }
}

/// Wire a dispatcher to a control channel
///
/// Channel callbacks only enqueue; the returned task consumes the queue.
/// The returned sender delivers [`ChannelSignal::Shutdown`] on stop,
/// letting an in-flight tool call finish instead of cancelling it.
pub fn attach(
    dispatcher: Arc<EventDispatcher>,
    channel: &ControlChannel,
) -> (JoinHandle<()>, mpsc::Sender<ChannelSignal>) {
    let (tx, rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);

    let open_tx = tx.clone();
    channel.on_open(move || {
        let tx = open_tx.clone();
        async move {
            let _ = tx.send(ChannelSignal::Opened).await;
        }
    });

    let message_tx = tx.clone();
    channel.on_message(move |text| {
        let tx = message_tx.clone();
        async move {
            let _ = tx.send(ChannelSignal::Message(text)).await;
        }
    });

    let task = dispatcher.spawn(rx);
    (task, tx)
}
