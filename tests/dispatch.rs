//! End-to-end dispatch tests
//!
//! Drive the dispatcher with raw wire messages and assert on the exact
//! outbound traffic, with the device behind a controllable fake.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use voicelink::{
    BatteryLevelTool, ClientEvent, DeviceServices, DispatchPolicy, EventDispatcher, EventSink,
    Result, ScreenBrightnessTool, Tool, ToolDescriptor, ToolOutcome, ToolRegistry,
};

#[derive(Default)]
struct CapturingSink {
    sent: Mutex<Vec<String>>,
}

impl CapturingSink {
    fn wire_messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for CapturingSink {
    async fn send_event(&self, event: &ClientEvent) -> Result<()> {
        self.sent.lock().unwrap().push(event.to_json()?);
        Ok(())
    }
}

struct FakeDevice {
    battery: f64,
}

#[async_trait]
impl DeviceServices for FakeDevice {
    async fn battery_level(&self) -> f64 {
        self.battery
    }

    async fn set_screen_brightness(&self, _level: f64) -> std::result::Result<(), String> {
        Ok(())
    }
}

fn device_registry(battery: f64) -> ToolRegistry {
    let device: Arc<dyn DeviceServices> = Arc::new(FakeDevice { battery });
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(BatteryLevelTool::new(Arc::clone(&device))))
        .unwrap();
    registry
        .register(Arc::new(ScreenBrightnessTool::new(device)))
        .unwrap();
    registry
}

fn policy(trigger_response: bool) -> DispatchPolicy {
    DispatchPolicy {
        instructions: "You can read the battery and set brightness.".to_string(),
        voice: None,
        trigger_response_after_tool: trigger_response,
        echo_mitigation: false,
        event_log_capacity: 32,
    }
}

fn dispatcher(
    registry: ToolRegistry,
    trigger_response: bool,
) -> (EventDispatcher, Arc<CapturingSink>) {
    let sink = Arc::new(CapturingSink::default());
    let dispatcher =
        EventDispatcher::new(Arc::new(registry), sink.clone(), policy(trigger_response), None);
    (dispatcher, sink)
}

fn battery_call(call_id: &str) -> String {
    format!(
        r#"{{"type":"response.function_call_arguments.done","name":"getBatteryLevel","arguments":"{{}}","call_id":"{}"}}"#,
        call_id
    )
}

#[tokio::test]
async fn test_open_advertises_registered_tools() {
    let (dispatcher, sink) = dispatcher(device_registry(0.5), true);

    dispatcher.on_channel_open().await.unwrap();

    let sent = sink.wire_messages();
    assert_eq!(sent.len(), 1);
    let update: Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(update["type"], "session.update");
    assert_eq!(update["session"]["modalities"], json!(["text", "audio"]));
    let tools = update["session"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["getBatteryLevel", "setScreenBrightness"]);
    assert!(tools.iter().all(|t| t["type"] == "function"));
}

#[tokio::test]
async fn test_battery_call_roundtrip() {
    let (dispatcher, sink) = dispatcher(device_registry(0.42), true);

    dispatcher.handle_message(&battery_call("c1")).await;

    let sent = sink.wire_messages();
    assert_eq!(sent.len(), 2);

    let reply: Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(reply["type"], "conversation.item.create");
    assert_eq!(reply["item"]["type"], "function_call_output");
    assert_eq!(reply["item"]["call_id"], "c1");
    assert_eq!(
        reply["item"]["output"].as_str().unwrap(),
        r#"{"success":true,"batteryLevel":0.42}"#
    );

    let trigger: Value = serde_json::from_str(&sent[1]).unwrap();
    assert_eq!(trigger["type"], "response.create");
}

#[tokio::test]
async fn test_battery_unsupported_delivers_structured_failure() {
    let (dispatcher, sink) = dispatcher(device_registry(-1.0), true);

    dispatcher.handle_message(&battery_call("c2")).await;

    let sent = sink.wire_messages();
    assert_eq!(sent.len(), 2);
    let reply: Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(reply["item"]["call_id"], "c2");
    let output: Value =
        serde_json::from_str(reply["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(
        output,
        json!({
            "success": false,
            "error": "Device does not support retrieving the battery level."
        })
    );
}

#[tokio::test]
async fn test_response_trigger_can_be_disabled() {
    let (dispatcher, sink) = dispatcher(device_registry(0.9), false);

    dispatcher.handle_message(&battery_call("c3")).await;

    let sent = sink.wire_messages();
    assert_eq!(sent.len(), 1);
    let reply: Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(reply["type"], "conversation.item.create");
}

#[tokio::test]
async fn test_unknown_tool_name_sends_nothing() {
    let (dispatcher, sink) = dispatcher(device_registry(0.5), true);

    dispatcher
        .handle_message(
            r#"{"type":"response.function_call_arguments.done","name":"openGarageDoor","arguments":"{}","call_id":"c4"}"#,
        )
        .await;

    assert!(sink.wire_messages().is_empty());
}

#[tokio::test]
async fn test_malformed_arguments_send_nothing() {
    let (dispatcher, sink) = dispatcher(device_registry(0.5), true);

    dispatcher
        .handle_message(
            r#"{"type":"response.function_call_arguments.done","name":"getBatteryLevel","arguments":"not json","call_id":"c5"}"#,
        )
        .await;

    assert!(sink.wire_messages().is_empty());
}

#[tokio::test]
async fn test_transcript_updates_without_outbound_traffic() {
    let (dispatcher, sink) = dispatcher(device_registry(0.5), true);

    dispatcher
        .handle_message(
            r#"{"type":"response.audio_transcript.done","transcript":"The battery is at 42 percent."}"#,
        )
        .await;

    assert_eq!(
        dispatcher.transcript().await,
        "The battery is at 42 percent."
    );
    assert!(sink.wire_messages().is_empty());

    dispatcher
        .handle_message(r#"{"type":"response.audio_transcript.done","transcript":"Done."}"#)
        .await;
    assert_eq!(dispatcher.transcript().await, "Done.");
}

struct CrashingTool;

#[async_trait]
impl Tool for CrashingTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::function("crash", "Always crashes.", json!({"type": "object"}))
    }

    async fn invoke(&self, _args: Value) -> ToolOutcome {
        panic!("tool blew up");
    }
}

#[tokio::test]
async fn test_crashing_tool_still_delivers_failure_record() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CrashingTool)).unwrap();
    let (dispatcher, sink) = dispatcher(registry, true);

    dispatcher
        .handle_message(
            r#"{"type":"response.function_call_arguments.done","name":"crash","arguments":"{}","call_id":"c6"}"#,
        )
        .await;

    let sent = sink.wire_messages();
    assert_eq!(sent.len(), 2);
    let reply: Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(reply["item"]["call_id"], "c6");
    let output: Value =
        serde_json::from_str(reply["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(output["success"], false);
    assert!(output["error"].as_str().unwrap().contains("aborted"));

    // A later call still works; the dispatcher survived the crash.
    dispatcher
        .handle_message(
            r#"{"type":"response.audio_transcript.done","transcript":"still alive"}"#,
        )
        .await;
    assert_eq!(dispatcher.transcript().await, "still alive");
}

#[tokio::test]
async fn test_serial_calls_reply_in_arrival_order() {
    let (dispatcher, sink) = dispatcher(device_registry(0.42), false);

    dispatcher.handle_message(&battery_call("a1")).await;
    dispatcher.handle_message(&battery_call("a2")).await;

    let ids: Vec<String> = sink
        .wire_messages()
        .iter()
        .map(|raw| {
            let v: Value = serde_json::from_str(raw).unwrap();
            v["item"]["call_id"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(ids, vec!["a1".to_string(), "a2".to_string()]);
}
