/**
 * Event Listener Example
 *
 * Shows both ways of consuming lifecycle events: a `DeviceListener` with
 * callbacks, and the raw event stream.
 *
 * Usage: cargo run --example event_listener -- 192.168.1.40
 */
use futures_util::StreamExt;
use rustgree::{DeviceConfig, DeviceEvent, DeviceListener, DeviceSnapshot, GreeError};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::time::{Duration, timeout};

struct Printer;

impl DeviceListener for Printer {
    fn on_connected(&self, success: bool, snapshot: &DeviceSnapshot) {
        println!("[listener] connected={} name={:?}", success, snapshot.name());
    }

    fn on_status(&self, snapshot: &DeviceSnapshot) {
        println!(
            "[listener] status: Pow={:?} SetTem={:?} TemSen={:?}",
            snapshot.get("Pow"),
            snapshot.get("SetTem"),
            snapshot.get("TemSen")
        );
    }

    fn on_error(&self, error: &GreeError, _snapshot: &DeviceSnapshot) {
        println!("[listener] error: {}", error);
    }

    fn on_disconnected(&self, snapshot: &DeviceSnapshot) {
        println!("[listener] disconnected while {}", snapshot.state);
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    // 1. Configuration as an accessory layer would load it
    let host: IpAddr = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or_else(|| [192, 168, 1, 40].into());
    let config = DeviceConfig {
        update_interval: 2000,
        ..DeviceConfig::for_host_octet(host)
    };
    println!("Config: {}", serde_json::to_string(&config).unwrap_or_default());

    let device = match config.builder().and_then(|b| b.build()) {
        Ok(device) => device,
        Err(e) => {
            println!("Invalid configuration: {}", e);
            return;
        }
    };

    // 2. Subscribe before starting so nothing is missed
    let listener = device.listen(Arc::new(Printer));
    let mut stream = std::pin::pin!(device.stream());

    if let Err(e) = device.start() {
        println!("Start failed: {}", e);
        return;
    }

    // 3. Watch the raw stream for a while
    let watch = async {
        while let Some(event) = stream.next().await {
            match event {
                DeviceEvent::Status(snapshot) => {
                    println!("[stream] {} values cached", snapshot.properties.len())
                }
                DeviceEvent::Update(snapshot) => {
                    println!("[stream] update: {:?}", snapshot.properties)
                }
                other => println!("[stream] {:?}", other),
            }
        }
    };
    let _ = timeout(Duration::from_secs(30), watch).await;

    device.stop();
    let _ = listener.await;
    println!("Done!");
}
