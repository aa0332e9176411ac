//! Voice session binary entry point
//!
//! Starts a realtime voice session against a credential issuer and the
//! realtime negotiation endpoint, registers the device tools, and prints
//! transcript updates until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! # Start with a local issuer
//! cargo run --bin voice_session -- \
//!   --issuer-url http://127.0.0.1:54321/functions/v1/token
//!
//! # Override the model and enable echo mitigation
//! cargo run --bin voice_session -- \
//!   --model gpt-4o-realtime-preview-2024-12-17 \
//!   --echo-mitigation
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use voicelink::{
    BatteryLevelTool, DeviceServices, HttpCredentialIssuer, ScreenBrightnessTool, SessionConfig,
    SessionController, ToolRegistry,
};

/// Realtime voice session client
///
/// Negotiates a WebRTC session with the realtime endpoint and exposes
/// local device tools to the remote model.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Credential issuer URL (POST, returns the ephemeral token)
    #[arg(
        long,
        default_value = "http://127.0.0.1:54321/functions/v1/token",
        env = "VOICELINK_ISSUER_URL"
    )]
    issuer_url: String,

    /// Realtime negotiation base URL
    #[arg(
        long,
        default_value = voicelink::DEFAULT_REALTIME_URL,
        env = "VOICELINK_REALTIME_URL"
    )]
    realtime_url: String,

    /// Realtime model identifier
    #[arg(long, default_value = voicelink::DEFAULT_MODEL, env = "VOICELINK_MODEL")]
    model: String,

    /// Instruction string advertised to the model
    #[arg(long, env = "VOICELINK_INSTRUCTIONS")]
    instructions: Option<String>,

    /// Voice preset requested from the model (e.g. "verse")
    #[arg(long, env = "VOICELINK_VOICE")]
    voice: Option<String>,

    /// Control data channel label
    #[arg(
        long,
        default_value = voicelink::CONTROL_CHANNEL_LABEL,
        env = "VOICELINK_CHANNEL_LABEL"
    )]
    channel_label: String,

    /// Do not send a response trigger after each tool output
    #[arg(long, default_value_t = false, env = "VOICELINK_NO_RESPONSE_TRIGGER")]
    no_response_trigger: bool,

    /// Mute the microphone while remote audio is playing
    #[arg(long, default_value_t = false, env = "VOICELINK_ECHO_MITIGATION")]
    echo_mitigation: bool,

    /// ICE gathering timeout in seconds
    #[arg(long, default_value_t = 10, env = "VOICELINK_ICE_TIMEOUT")]
    ice_timeout_secs: u64,

    /// HTTP timeout in seconds for issuer and negotiation calls
    #[arg(long, default_value_t = 15, env = "VOICELINK_HTTP_TIMEOUT")]
    http_timeout_secs: u64,

    /// Transcript poll interval in milliseconds
    #[arg(long, default_value_t = 500, env = "VOICELINK_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,
}

/// Device services backed by Linux sysfs
///
/// Battery level comes from `/sys/class/power_supply/*/capacity`;
/// brightness writes go through `/sys/class/backlight/*`.
struct SysfsDevice;

impl SysfsDevice {
    fn battery_capacity_path() -> Option<PathBuf> {
        let entries = std::fs::read_dir("/sys/class/power_supply").ok()?;
        for entry in entries.flatten() {
            let capacity = entry.path().join("capacity");
            if capacity.exists() {
                return Some(capacity);
            }
        }
        None
    }

    fn backlight_dir() -> Option<PathBuf> {
        let entries = std::fs::read_dir("/sys/class/backlight").ok()?;
        entries.flatten().next().map(|entry| entry.path())
    }
}

#[async_trait]
impl DeviceServices for SysfsDevice {
    async fn battery_level(&self) -> f64 {
        let Some(path) = Self::battery_capacity_path() else {
            return -1.0;
        };
        match std::fs::read_to_string(&path) {
            Ok(raw) => match raw.trim().parse::<f64>() {
                Ok(percent) => (percent / 100.0).clamp(0.0, 1.0),
                Err(_) => -1.0,
            },
            Err(_) => -1.0,
        }
    }

    async fn set_screen_brightness(&self, level: f64) -> Result<(), String> {
        let Some(dir) = Self::backlight_dir() else {
            return Err("No backlight device available.".to_string());
        };

        let max: u64 = std::fs::read_to_string(dir.join("max_brightness"))
            .map_err(|e| format!("Failed to read max brightness: {}", e))?
            .trim()
            .parse()
            .map_err(|e| format!("Invalid max brightness value: {}", e))?;

        let target = (level * max as f64).round() as u64;
        std::fs::write(dir.join("brightness"), target.to_string())
            .map_err(|e| format!("Failed to set brightness: {}", e))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %args.model,
        "Voice session client starting"
    );

    let config = SessionConfig {
        issuer_url: args.issuer_url.clone(),
        realtime_url: args.realtime_url.clone(),
        model: args.model.clone(),
        instructions: args
            .instructions
            .clone()
            .unwrap_or_else(|| voicelink::config::DEFAULT_INSTRUCTIONS.to_string()),
        voice: args.voice.clone(),
        channel_label: args.channel_label.clone(),
        trigger_response_after_tool: !args.no_response_trigger,
        echo_mitigation: args.echo_mitigation,
        ice_gathering_timeout_secs: args.ice_timeout_secs,
        http_timeout_secs: args.http_timeout_secs,
        ..Default::default()
    };
    config.validate()?;

    let issuer = Arc::new(HttpCredentialIssuer::new(
        config.issuer_url.clone(),
        Duration::from_secs(config.http_timeout_secs),
    )?);

    let device: Arc<dyn DeviceServices> = Arc::new(SysfsDevice);
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(BatteryLevelTool::new(Arc::clone(&device))))?;
    registry.register(Arc::new(ScreenBrightnessTool::new(device)))?;
    info!("Registered {} device tools", registry.len());

    let controller = SessionController::new(config, issuer, Arc::new(registry));
    controller.start().await?;
    info!(
        session_id = ?controller.session_id().await,
        "Session active. Press Ctrl+C to stop."
    );

    let mut last_transcript = String::new();
    let mut poll = tokio::time::interval(Duration::from_millis(args.poll_interval_ms));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = poll.tick() => {
                let transcript = controller.transcript().await;
                if transcript != last_transcript && !transcript.is_empty() {
                    println!("assistant: {}", transcript);
                    last_transcript = transcript;
                }
            }
        }
    }

    if let Err(err) = controller.stop().await {
        warn!("Teardown error: {}", err);
    }
    info!("Session stopped");
    Ok(())
}

fn init_tracing() {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
