// Keyboard teleop: WASD drive, SPACE action, E emergency stop toggle, R/F speed, Q quit
// Usage: cargo run --example teleop
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use nxt_zenoh_runtime::config::TOPIC_CMD;
use nxt_zenoh_runtime::messages::DriveCommand;

const SPEEDS: [f64; 3] = [0.3, 0.6, 1.0]; // fraction of full motor power
const INPUT_TIMEOUT_MS: u64 = 100; // Reset velocity after this much time with no input

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: WASD=drive, SPACE=action, E=emergency stop, R/F=speed, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn send(publisher: &zenoh::pubsub::Publisher<'_>, cmd: DriveCommand) -> Result<(), BoxError> {
    publisher.put(serde_json::to_string(&cmd)?).await?;
    Ok(())
}

async fn run_teleop(publisher: &zenoh::pubsub::Publisher<'_>) -> Result<(), BoxError> {
    let mut speed_idx: usize = 0;

    // Persistent velocity state
    let mut x = 0.0;
    let mut y = 0.0;
    let mut last_movement_input = Instant::now();
    let mut action_held = false;
    let mut emergency = false;

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Drive
                    KeyCode::Char('w') if pressed => {
                        y = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        y = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Steer
                    KeyCode::Char('a') if pressed => {
                        x = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        x = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }

                    // Action is held while the key repeats
                    KeyCode::Char(' ') if pressed => {
                        if !action_held {
                            send(publisher, DriveCommand::Action { start: true }).await?;
                            action_held = true;
                        }
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char('e') if kind == KeyEventKind::Press => {
                        emergency = !emergency;
                        info!("Emergency stop: {}", if emergency { "ON" } else { "OFF" });
                        send(publisher, DriveCommand::EmergencyStop { stop: emergency }).await?;
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset velocity and release the action if no input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            x = 0.0;
            y = 0.0;
            if action_held {
                send(publisher, DriveCommand::Action { start: false }).await?;
                action_held = false;
            }
        }

        // Always publish at ~50Hz
        send(publisher, DriveCommand::Velocity { x, y }).await?;
    }

    if action_held {
        send(publisher, DriveCommand::Action { start: false }).await?;
    }
    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
