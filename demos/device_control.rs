/**
 * Device Control Example
 *
 * Binds to a single unit, waits for the first status reply and then drives
 * it through the typed setters.
 *
 * Usage: cargo run --example device_control -- 192.168.1.40
 */
use rustgree::{DeviceBuilder, FanSpeed, Mode, TemperatureUnit};
use std::net::IpAddr;
use tokio::time::{Duration, sleep, timeout};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let host: IpAddr = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or_else(|| [255, 255, 255, 255].into());

    // 1. Build and start the device
    let device = match DeviceBuilder::new(host)
        .poll_interval(Duration::from_secs(3))
        .build()
    {
        Ok(device) => device,
        Err(e) => {
            println!("Invalid configuration: {}", e);
            return;
        }
    };
    println!("--- Rustgree Control Example ({}) ---", host);
    if let Err(e) = device.start() {
        println!("Start failed: {}", e);
        return;
    }

    // 2. Wait for the bind handshake
    match timeout(Duration::from_secs(30), device.connected()).await {
        Ok(Ok(())) => println!(
            "Bound to {:?} at {:?}",
            device.identity(),
            device.endpoint()
        ),
        Ok(Err(e)) => {
            println!("Device stopped: {}", e);
            return;
        }
        Err(_) => {
            println!("No unit answered within 30s");
            device.stop();
            return;
        }
    }

    // Give the first poll a moment to fill the cache
    sleep(Duration::from_secs(1)).await;
    println!(
        "Power: {:?}, mode: {:?}, target: {:?}, room: {:?}",
        device.power(),
        device.mode(),
        device.target_temperature(),
        device.room_temperature()
    );

    // 3. Send commands
    println!("Step 1: Switching ON in cool mode...");
    if let Err(e) = device.set_power(true).await {
        println!("set_power failed: {}", e);
    }
    if let Err(e) = device.set_mode(Mode::Cool).await {
        println!("set_mode failed: {}", e);
    }

    println!("Step 2: Target 24°C, medium fan...");
    if let Err(e) = device
        .set_target_temperature(24, TemperatureUnit::Celsius)
        .await
    {
        println!("set_target_temperature failed: {}", e);
    }
    if let Err(e) = device.set_fan_speed(FanSpeed::Medium).await {
        println!("set_fan_speed failed: {}", e);
    }

    sleep(Duration::from_secs(4)).await;
    println!("Snapshot after commands: {:?}", device.snapshot().properties);

    println!("Step 3: Switching OFF...");
    if let Err(e) = device.set_power(false).await {
        println!("set_power failed: {}", e);
    }

    device.stop();
    println!("Done!");
}
