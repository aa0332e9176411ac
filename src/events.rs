//! Control-channel protocol vocabulary
//!
//! The control channel carries UTF-8 JSON text messages, each tagged with
//! a `type` discriminator. Inbound events the dispatcher does not
//! recognize are passed through for observability rather than rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolDescriptor;
use crate::{Error, Result};

/// Server events the dispatcher acts on
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Final transcript of a remote audio response
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone { transcript: String },

    /// The model finished streaming arguments for a tool call
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        name: String,
        call_id: String,
        /// JSON-encoded argument record (a string on the wire)
        arguments: String,
    },

    /// A server audio-output segment started playing
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioStarted,

    /// The server audio-output segment finished
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioStopped,
}

/// A parsed inbound control-channel message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// An event the dispatcher acts on
    Known(ServerEvent),
    /// Any other tagged event, retained for observability
    Unrecognized {
        event_type: String,
        payload: Value,
    },
}

impl InboundEvent {
    /// Parse one inbound text message
    ///
    /// # Errors
    ///
    /// `Error::ProtocolParse` when the payload is not JSON, lacks a
    /// string `type` discriminator, or a recognized event is missing
    /// required fields. Unknown `type` values are not errors.
    pub fn parse(text: &str) -> Result<InboundEvent> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::ProtocolParse(format!("invalid JSON: {}", e)))?;

        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::ProtocolParse("missing 'type' discriminator".to_string())
            })?
            .to_string();

        match serde_json::from_value::<ServerEvent>(value.clone()) {
            Ok(event) => Ok(InboundEvent::Known(event)),
            // serde reports an unrecognized tag as an unknown-variant
            // error; the enum's rename attributes are the one list of
            // handled types.
            Err(e) if e.to_string().starts_with("unknown variant") => {
                Ok(InboundEvent::Unrecognized {
                    event_type,
                    payload: value,
                })
            }
            Err(e) => Err(Error::ProtocolParse(format!(
                "malformed '{}' event: {}",
                event_type, e
            ))),
        }
    }
}

/// Session configuration payload advertised on channel open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Supported modalities, always `["text", "audio"]`
    pub modalities: Vec<String>,
    /// Instruction string describing available capabilities
    pub instructions: String,
    /// Voice preset; omitted when the issuer default applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Tool descriptors taken verbatim from the registry
    pub tools: Vec<ToolDescriptor>,
}

/// Conversation item carried by `conversation.item.create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationItem {
    /// Serialized result of a local tool call
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

/// Client events sent over the control channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Initial session configuration, sent exactly once per channel
    /// lifetime
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    /// Deliver a tool result back to the remote service
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Ask the model to continue after receiving tool output
    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    /// Build the one-time session configuration message
    pub fn session_update(
        instructions: impl Into<String>,
        voice: Option<String>,
        tools: Vec<ToolDescriptor>,
    ) -> Self {
        ClientEvent::SessionUpdate {
            session: SessionSettings {
                modalities: vec!["text".to_string(), "audio".to_string()],
                instructions: instructions.into(),
                voice,
                tools,
            },
        }
    }

    /// Build a tool output reply carrying the original call id
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output: output.into(),
            },
        }
    }

    /// Serialize to the wire representation
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::ProtocolParse(format!("failed to serialize event: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_transcript_done() {
        let event = InboundEvent::parse(
            r#"{"type":"response.audio_transcript.done","transcript":"hello world"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::Known(ServerEvent::AudioTranscriptDone {
                transcript: "hello world".to_string()
            })
        );
    }

    #[test]
    fn test_parse_function_call_arguments_done() {
        let event = InboundEvent::parse(
            r#"{"type":"response.function_call_arguments.done","name":"getBatteryLevel","arguments":"{}","call_id":"c1"}"#,
        )
        .unwrap();
        match event {
            InboundEvent::Known(ServerEvent::FunctionCallArgumentsDone {
                name,
                call_id,
                arguments,
            }) => {
                assert_eq!(name, "getBatteryLevel");
                assert_eq!(call_id, "c1");
                assert_eq!(arguments, "{}");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_output_audio_lifecycle() {
        assert_eq!(
            InboundEvent::parse(r#"{"type":"output_audio_buffer.started"}"#).unwrap(),
            InboundEvent::Known(ServerEvent::OutputAudioStarted)
        );
        assert_eq!(
            InboundEvent::parse(r#"{"type":"output_audio_buffer.stopped"}"#).unwrap(),
            InboundEvent::Known(ServerEvent::OutputAudioStopped)
        );
    }

    #[test]
    fn test_parse_unrecognized_passthrough() {
        let event =
            InboundEvent::parse(r#"{"type":"response.created","response":{"id":"r1"}}"#).unwrap();
        match event {
            InboundEvent::Unrecognized {
                event_type,
                payload,
            } => {
                assert_eq!(event_type, "response.created");
                assert_eq!(payload["response"]["id"], "r1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_invalid_json_is_protocol_error() {
        let err = InboundEvent::parse("not json").unwrap_err();
        assert!(matches!(err, Error::ProtocolParse(_)));
    }

    #[test]
    fn test_parse_missing_type_is_protocol_error() {
        let err = InboundEvent::parse(r#"{"transcript":"hi"}"#).unwrap_err();
        assert!(matches!(err, Error::ProtocolParse(_)));
    }

    #[test]
    fn test_parse_unknown_type_never_errors() {
        // An unhandled tag stays a passthrough regardless of payload
        // shape; only handled tags are held to their field contracts.
        let event =
            InboundEvent::parse(r#"{"type":"session.created","transcript":5}"#).unwrap();
        assert!(matches!(event, InboundEvent::Unrecognized { .. }));
    }

    #[test]
    fn test_parse_malformed_known_event_is_protocol_error() {
        // Recognized tag but the required field is missing.
        let err = InboundEvent::parse(r#"{"type":"response.audio_transcript.done"}"#).unwrap_err();
        assert!(matches!(err, Error::ProtocolParse(_)));
    }

    #[test]
    fn test_parse_ignores_extra_fields() {
        let event = InboundEvent::parse(
            r#"{"type":"response.audio_transcript.done","transcript":"hi","event_id":"e7"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::Known(ServerEvent::AudioTranscriptDone {
                transcript: "hi".to_string()
            })
        );
    }

    #[test]
    fn test_function_call_output_wire_format() {
        let event = ClientEvent::function_call_output("c1", r#"{"success":true}"#);
        let wire = event.to_json().unwrap();
        assert_eq!(
            wire,
            r#"{"type":"conversation.item.create","item":{"type":"function_call_output","call_id":"c1","output":"{\"success\":true}"}}"#
        );
    }

    #[test]
    fn test_response_create_wire_format() {
        assert_eq!(
            ClientEvent::ResponseCreate.to_json().unwrap(),
            r#"{"type":"response.create"}"#
        );
    }

    #[test]
    fn test_session_update_contains_descriptors_verbatim() {
        let descriptor = ToolDescriptor::function(
            "getBatteryLevel",
            "Reads the battery level.",
            json!({"type": "object", "properties": {}}),
        );
        let event = ClientEvent::session_update("do things", None, vec![descriptor.clone()]);
        let wire: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(wire["type"], "session.update");
        assert_eq!(wire["session"]["modalities"], json!(["text", "audio"]));
        assert_eq!(wire["session"]["instructions"], "do things");
        assert!(wire["session"].get("voice").is_none());
        let tools = wire["session"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["name"], "getBatteryLevel");
        assert_eq!(tools[0]["description"], "Reads the battery level.");
        assert_eq!(tools[0]["parameters"], descriptor.parameters);
    }

    #[test]
    fn test_session_update_carries_voice_when_set() {
        let event =
            ClientEvent::session_update("do things", Some("verse".to_string()), Vec::new());
        let wire: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(wire["session"]["voice"], "verse");
    }
}
