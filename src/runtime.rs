// 50 Hz bridge loop with watchdog
// Note: a watchdog is a safety mechanism that triggers a safe action if something goes wrong
// Eg. if teleop crashes and stops sending velocity commands, the robot is brought to a halt
// instead of driving on with the last velocity it was given

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{info, warn};

use crate::brick::{Brick, BrickEvent};
use crate::config::{BrickConfig, CMD_TIMEOUT, LOOP_HZ, TOPIC_CMD, TOPIC_EVENTS, TOPIC_HEALTH};
use crate::messages::{DriveCommand, RuntimeHealth};
use crate::robot::kinematics::Velocity;
use crate::robot::{Robot, RobotError, RobotModel};

/// What the bridge connects to
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub port: String,
    pub model: RobotModel,
    pub config: Option<PathBuf>,
}

pub struct Runtime {
    latest_velocity: Option<Velocity>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            latest_velocity: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Record a velocity command; only these feed the watchdog
    pub fn on_command(&mut self, cmd: &DriveCommand) {
        if let DriveCommand::Velocity { x, y } = *cmd {
            self.latest_velocity = Some(Velocity::new(x, y));
            self.cmd_received_at = Instant::now();
        }
    }

    /// Velocity to apply this tick, zero when the command is stale
    pub fn compute_velocity(&mut self, emergency: bool) -> Velocity {
        let cmd_age = self.cmd_received_at.elapsed();

        if emergency {
            self.health = RuntimeHealth::EmergencyStop;
            Velocity::default()
        } else if cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stop the robot
            if self.health == RuntimeHealth::Ok {
                warn!("Command stale ({:?} old), stopping robot", cmd_age);
            }
            self.health = RuntimeHealth::CmdStale;
            Velocity::default()
        } else if let Some(velocity) = self.latest_velocity {
            self.health = RuntimeHealth::Ok;
            velocity
        } else {
            // No command ever received
            self.health = RuntimeHealth::CmdStale;
            Velocity::default()
        }
    }
}

/// Apply the commands that act on the robot directly
///
/// Releasing an emergency stop restarts the robot if it is not running.
fn apply(robot: &Robot, cmd: DriveCommand) -> Result<(), RobotError> {
    match cmd {
        DriveCommand::Velocity { .. } => {}
        DriveCommand::Action { start } => robot.action(start),
        DriveCommand::EmergencyStop { stop: true } => robot.emergency_stop(true),
        DriveCommand::EmergencyStop { stop: false } => {
            robot.emergency_stop(false);
            if !robot.is_running() {
                info!("Emergency stop released, restarting robot");
                robot.start()?;
            }
        }
    }
    Ok(())
}

pub async fn run(options: RunOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = match &options.config {
        Some(path) => {
            info!("Loading brick config from {}", path.display());
            BrickConfig::load(path)?
        }
        None => BrickConfig::default(),
    };

    // Listeners run on the reader thread; hand events to the loop
    let brick = Brick::serial(config);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<BrickEvent>();
    brick.subscribe(move |event| {
        let _ = events_tx.send(event.clone());
    });

    brick.connect(&options.port)?;
    let robot = Robot::new(&brick, options.model)?;

    // Motors are stopped and the link closed on every exit path
    let result = match robot.start() {
        Ok(()) => bridge(&robot, &options, &mut events_rx).await,
        Err(e) => Err(e.into()),
    };
    robot.stop();
    brick.shutdown().await;
    info!("Brick disconnected");
    result
}

async fn bridge(
    robot: &Robot,
    options: &RunOptions,
    events_rx: &mut mpsc::UnboundedReceiver<BrickEvent>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_events = session.declare_publisher(TOPIC_EVENTS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {:?} on {}, {}Hz loop, {}ms watchdog timeout",
        options.model,
        options.port,
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD);
    info!("Publishing to: {}, {}", TOPIC_EVENTS, TOPIC_HEALTH);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            _ = tick.tick() => {}
        }

        // 1. Drain all pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveCommand>(&payload) {
                Ok(cmd) => {
                    runtime.on_command(&cmd);
                    if let Err(e) = apply(robot, cmd) {
                        warn!("Failed to apply {:?}: {}", cmd, e);
                    }
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Velocity for the motion task (includes watchdog logic)
        let velocity = runtime.compute_velocity(robot.is_emergency_stop());
        robot.set_velocity(velocity.x, velocity.y);

        // 3. Forward brick events
        while let Ok(event) = events_rx.try_recv() {
            pub_events.put(serde_json::to_string(&event)?).await?;
        }

        // 4. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brick::link::mock::MockBrick;

    #[test]
    fn test_stale_until_first_command() {
        let mut runtime = Runtime::new();
        assert_eq!(runtime.compute_velocity(false), Velocity::default());
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_fresh_velocity_passes_through() {
        let mut runtime = Runtime::new();
        runtime.on_command(&DriveCommand::Velocity { x: 0.2, y: -0.7 });
        assert_eq!(runtime.compute_velocity(false), Velocity::new(0.2, -0.7));
        assert_eq!(runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_watchdog_zeroes_stale_velocity() {
        let mut runtime = Runtime::new();
        runtime.on_command(&DriveCommand::Velocity { x: 0.0, y: 1.0 });
        std::thread::sleep(CMD_TIMEOUT + Duration::from_millis(50));

        assert_eq!(runtime.compute_velocity(false), Velocity::default());
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_other_commands_do_not_feed_watchdog() {
        let mut runtime = Runtime::new();
        runtime.on_command(&DriveCommand::Action { start: true });
        runtime.on_command(&DriveCommand::EmergencyStop { stop: false });
        assert_eq!(runtime.compute_velocity(false), Velocity::default());
        assert_eq!(runtime.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_emergency_overrides_velocity() {
        let mut runtime = Runtime::new();
        runtime.on_command(&DriveCommand::Velocity { x: 0.0, y: 1.0 });
        assert_eq!(runtime.compute_velocity(true), Velocity::default());
        assert_eq!(runtime.health(), RuntimeHealth::EmergencyStop);
    }

    #[tokio::test]
    async fn test_emergency_release_restarts_robot() {
        let (_mock, connector) = MockBrick::new();
        let brick = Brick::new(connector, BrickConfig::default());
        brick.connect("nxt").unwrap();
        let robot = Robot::new(&brick, RobotModel::CastorBot).unwrap();
        robot.start().unwrap();

        apply(&robot, DriveCommand::EmergencyStop { stop: true }).unwrap();
        assert!(robot.is_emergency_stop());
        assert!(!robot.is_running());

        apply(&robot, DriveCommand::EmergencyStop { stop: false }).unwrap();
        assert!(!robot.is_emergency_stop());
        assert!(robot.is_running());
        robot.stop();
    }
}
