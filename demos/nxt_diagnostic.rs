// Brick diagnostic: checks the link without moving anything
//
// Beeps once, then only reads motor and sensor state. No motor is driven
// and no input port is reconfigured.
//
// Usage: cargo run --example nxt_diagnostic -- [port]
// Example: cargo run --example nxt_diagnostic -- /dev/rfcomm0

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use nxt_zenoh_runtime::brick::{ActorPin, Brick, BrickEvent, Command};
use nxt_zenoh_runtime::config::{BRICK_PORT, BrickConfig};

const MOTOR_NAMES: [&str; 3] = ["A (tool)", "B (left)", "C (right)"];
const REPLY_WAIT: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    // Get port from args or use default
    let port = std::env::args().nth(1).unwrap_or_else(|| BRICK_PORT.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              NXT Brick Diagnostic (READ-ONLY)                ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  One beep, then state reads only - no motor movement         ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Serial port: {}", port);
    println!();

    let brick = Brick::serial(BrickConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        brick.subscribe(move |event| seen.lock().push(event.clone()));
    }

    // Open the link
    println!("Step 1: Connecting...");
    if let Err(e) = brick.connect(&port) {
        println!("  ✗ Failed to connect: {}", e);
        println!();
        println!("Troubleshooting:");
        println!("  - Pair the brick and bind it, e.g. `rfcomm bind 0 <address>`");
        println!("  - Check the brick is switched on and Bluetooth is visible");
        println!("  - Check you have permission to open {}", port);
        return Err(e.into());
    }
    println!("  ✓ Connected");
    println!();

    println!("Step 2: Beep (440 Hz, 200 ms)...");
    brick.beep(440, 200);
    println!("  ✓ Sent - you should hear it");
    println!();

    println!("Step 3: Reading motor state...");
    for pin in ActorPin::ALL {
        brick.queue().submit(Command::ReadActorState { port: pin.port() });
    }
    tokio::time::sleep(REPLY_WAIT).await;
    for pin in ActorPin::ALL {
        let name = MOTOR_NAMES[pin.port() as usize];
        let state = seen.lock().iter().find_map(|event| match event {
            BrickEvent::MotorState(state) if state.port == pin.port() => Some(*state),
            _ => None,
        });
        match state {
            Some(state) => println!(
                "  Motor {}: power {}, tacho {}, rotation {}",
                name, state.power, state.tacho_count, state.rotation_count
            ),
            None => println!("  Motor {}: ✗ NO RESPONSE", name),
        }
    }
    println!();

    println!("Step 4: Reading input ports...");
    for port in 0..4u8 {
        brick.queue().submit(Command::ReadSensorState { port });
    }
    tokio::time::sleep(REPLY_WAIT).await;
    for port in 0..4u8 {
        let value = seen.lock().iter().find_map(|event| match event {
            BrickEvent::InputState {
                port: p,
                sensor_type,
                value,
            } if *p == port => Some((*sensor_type, *value)),
            _ => None,
        });
        match value {
            Some((sensor_type, value)) => println!(
                "  Port S{}: type 0x{:02X}, value {}",
                port + 1,
                sensor_type,
                value
            ),
            None => println!("  Port S{}: ✗ NO RESPONSE", port + 1),
        }
    }
    println!();

    let errors: Vec<String> = seen
        .lock()
        .iter()
        .filter_map(|event| match event {
            BrickEvent::SendError { reason } | BrickEvent::ReceiveError { reason } => {
                Some(reason.clone())
            }
            _ => None,
        })
        .collect();
    if errors.is_empty() {
        println!("✓ No link errors");
    } else {
        println!("⚠ WARNING: {} link error(s):", errors.len());
        for reason in errors {
            println!("  - {}", reason);
        }
    }

    println!();
    println!("Step 5: Disconnecting (motors stopped, link closed)...");
    brick.shutdown().await;
    println!("  ✓ Done");
    Ok(())
}
