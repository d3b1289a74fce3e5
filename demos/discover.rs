//! Discover switches on a subnet and watch engine events
//!
//! ```text
//! cargo run --example discover -- 192.168.1.0/24
//! RUST_LOG=sonoff_lan=debug cargo run --example discover
//! ```

use sonoff_lan::{DeviceEngine, EngineConfig, EngineEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sonoff_lan=info")),
        )
        .init();

    let mut config = EngineConfig::default();
    if let Some(subnet) = std::env::args().nth(1) {
        config = config.with_subnet(subnet);
    }

    let engine = DeviceEngine::new(config)?;
    let mut events = engine.subscribe_events();
    engine.start().await;

    for device in engine.list_devices() {
        println!(
            "{:<24} {:<16} {:<8?} {:<7} {}",
            device.id, device.ip_address, device.device_type, device.power_state, device.name
        );
    }

    println!("Watching for updates, press Ctrl-C to exit");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(EngineEvent::TelemetryRefreshed { devices }) => {
                    for device in devices {
                        println!(
                            "{} is {} ({:?})",
                            device.id, device.power_state, device.telemetry
                        );
                    }
                }
                Ok(other) => println!("{:?}", other),
                Err(e) => eprintln!("{}", e),
            },
        }
    }

    engine.stop().await;
    Ok(())
}
