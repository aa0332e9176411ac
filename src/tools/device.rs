//! Device capability tools
//!
//! Platform bindings are injected through [`DeviceServices`]; the tools
//! only translate between the wire contract and that trait, so hosts and
//! tests supply their own implementations.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolDescriptor, ToolOutcome};

/// Platform services the device tools rely on
#[async_trait]
pub trait DeviceServices: Send + Sync {
    /// Battery charge as a fraction in `[0, 1]`, or a negative value when
    /// the platform cannot report it
    async fn battery_level(&self) -> f64;

    /// Set the screen brightness to a fraction in `[0, 1]`
    async fn set_screen_brightness(&self, level: f64) -> std::result::Result<(), String>;
}

/// Reads the device battery level
pub struct BatteryLevelTool {
    device: Arc<dyn DeviceServices>,
}

impl BatteryLevelTool {
    pub fn new(device: Arc<dyn DeviceServices>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Tool for BatteryLevelTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::function(
            "getBatteryLevel",
            "Retrieves the current battery level of the device as a fraction between 0 and 1.",
            json!({
                "type": "object",
                "properties": {}
            }),
        )
    }

    async fn invoke(&self, _args: Value) -> ToolOutcome {
        let level = self.device.battery_level().await;
        if level < 0.0 {
            return ToolOutcome::failure(
                "Device does not support retrieving the battery level.",
            );
        }
        ToolOutcome::success(json!({ "batteryLevel": level }))
    }
}

/// Changes the device screen brightness
pub struct ScreenBrightnessTool {
    device: Arc<dyn DeviceServices>,
}

impl ScreenBrightnessTool {
    pub fn new(device: Arc<dyn DeviceServices>) -> Self {
        Self { device }
    }
}

#[async_trait]
impl Tool for ScreenBrightnessTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::function(
            "setScreenBrightness",
            "Sets the device screen brightness.",
            json!({
                "type": "object",
                "properties": {
                    "brightness": {
                        "type": "number",
                        "description": "Brightness level between 0 and 1."
                    }
                },
                "required": ["brightness"]
            }),
        )
    }

    async fn invoke(&self, args: Value) -> ToolOutcome {
        let Some(brightness) = args.get("brightness").and_then(Value::as_f64) else {
            return ToolOutcome::failure("Missing or invalid 'brightness' argument.");
        };
        let brightness = brightness.clamp(0.0, 1.0);
        match self.device.set_screen_brightness(brightness).await {
            Ok(()) => ToolOutcome::success(json!({ "brightness": brightness })),
            Err(reason) => ToolOutcome::failure(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeDevice {
        battery: f64,
        brightness_log: Mutex<Vec<f64>>,
        brightness_error: Option<String>,
    }

    impl FakeDevice {
        fn with_battery(battery: f64) -> Self {
            Self {
                battery,
                brightness_log: Mutex::new(Vec::new()),
                brightness_error: None,
            }
        }
    }

    #[async_trait]
    impl DeviceServices for FakeDevice {
        async fn battery_level(&self) -> f64 {
            self.battery
        }

        async fn set_screen_brightness(&self, level: f64) -> std::result::Result<(), String> {
            if let Some(reason) = &self.brightness_error {
                return Err(reason.clone());
            }
            self.brightness_log.lock().unwrap().push(level);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_battery_level_success() {
        let tool = BatteryLevelTool::new(Arc::new(FakeDevice::with_battery(0.42)));
        let outcome = tool.invoke(json!({})).await;
        assert_eq!(
            outcome.as_value(),
            &json!({"success": true, "batteryLevel": 0.42})
        );
    }

    #[tokio::test]
    async fn test_battery_level_unsupported() {
        let tool = BatteryLevelTool::new(Arc::new(FakeDevice::with_battery(-1.0)));
        let outcome = tool.invoke(json!({})).await;
        assert_eq!(
            outcome.as_value(),
            &json!({
                "success": false,
                "error": "Device does not support retrieving the battery level."
            })
        );
    }

    #[tokio::test]
    async fn test_brightness_clamps_out_of_range() {
        let device = Arc::new(FakeDevice::with_battery(1.0));
        let tool = ScreenBrightnessTool::new(device.clone());
        let outcome = tool.invoke(json!({"brightness": 1.7})).await;
        assert!(outcome.is_success());
        assert_eq!(device.brightness_log.lock().unwrap().as_slice(), &[1.0]);
    }

    #[tokio::test]
    async fn test_brightness_missing_argument() {
        let tool = ScreenBrightnessTool::new(Arc::new(FakeDevice::with_battery(1.0)));
        let outcome = tool.invoke(json!({})).await;
        assert!(!outcome.is_success());
        assert!(outcome.error().unwrap().contains("brightness"));
    }

    #[tokio::test]
    async fn test_brightness_device_failure_is_structured() {
        let device = FakeDevice {
            battery: 1.0,
            brightness_log: Mutex::new(Vec::new()),
            brightness_error: Some("backlight not writable".to_string()),
        };
        let tool = ScreenBrightnessTool::new(Arc::new(device));
        let outcome = tool.invoke(json!({"brightness": 0.5})).await;
        assert_eq!(outcome.error(), Some("backlight not writable"));
    }

    #[test]
    fn test_descriptors_advertise_wire_names() {
        let device = Arc::new(FakeDevice::with_battery(1.0));
        let battery = BatteryLevelTool::new(device.clone()).descriptor();
        assert_eq!(battery.name, "getBatteryLevel");
        let brightness = ScreenBrightnessTool::new(device).descriptor();
        assert_eq!(brightness.name, "setScreenBrightness");
        assert_eq!(
            brightness.parameters["required"],
            json!(["brightness"])
        );
    }
}
