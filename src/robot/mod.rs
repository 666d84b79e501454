// Robot built on an NXT brick
//
// Owns the drive motors, any sensors, and the scheduler that runs the
// motion task and the sensor polls. The motion task only reads the latest
// wheel speeds; callers update them through `set_velocity`.

pub mod kinematics;
pub mod scheduler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::brick::{Actor, ActorPin, Brick, Sensor, SensorKind, SensorPin, SensorState};
use kinematics::{Velocity, WheelSpeeds, velocity_to_wheels};
use scheduler::{PeriodicTask, ScheduleError, Scheduler};

const MOTION_TASK: &str = "motion";

/// Touch sensor poll period on the MadBot
const BUMPER_PERIOD: Duration = Duration::from_millis(100);

/// Velocity set on emergency stop before the motors are zeroed
const EMERGENCY_VELOCITY: Velocity = Velocity { x: 0.01, y: 0.01 };

/// Tool motor power while the ShotBot action is held
const SHOOT_SPEED: i32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum RobotError {
    #[error("Brick is not connected")]
    NotConnected,

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Supported builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RobotModel {
    /// Two drive motors on B (left) and C (right), no sensors
    #[value(name = "castor")]
    CastorBot,
    /// CastorBot with a touch sensor on S1 acting as an emergency bumper
    #[value(name = "madbot")]
    MadBot,
    /// CastorBot with reversed mounting and a shooter motor on A
    #[value(name = "shotbot")]
    ShotBot,
}

impl RobotModel {
    /// Sign applied to the drive axis
    pub fn direction(self) -> f64 {
        match self {
            RobotModel::ShotBot => 1.0,
            RobotModel::CastorBot | RobotModel::MadBot => -1.0,
        }
    }
}

struct Shared {
    model: RobotModel,
    left: Actor,
    right: Actor,
    /// Shooter motor (ShotBot only)
    tool: Option<Actor>,
    sensors: Vec<Arc<Sensor>>,
    wheels: Mutex<WheelSpeeds>,
    emergency: AtomicBool,
    emergency_at: Mutex<Option<SystemTime>>,
    scheduler: Scheduler,
    motion_period: Duration,
}

pub struct Robot {
    shared: Arc<Shared>,
}

impl Robot {
    /// Create the motors and sensors for `model` on a connected brick
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn new(brick: &Brick, model: RobotModel) -> Result<Self, RobotError> {
        if !brick.is_connected() {
            return Err(RobotError::NotConnected);
        }

        let tool = (model == RobotModel::ShotBot).then(|| brick.create_actor(ActorPin::A));
        let sensors = match model {
            RobotModel::MadBot => vec![Arc::new(brick.create_sensor_with_period(
                SensorKind::Touch,
                SensorPin::S1,
                BUMPER_PERIOD,
            ))],
            RobotModel::CastorBot | RobotModel::ShotBot => Vec::new(),
        };

        info!("Robot {:?} ready with {} sensor(s)", model, sensors.len());
        Ok(Self {
            shared: Arc::new(Shared {
                model,
                left: brick.create_actor(ActorPin::B),
                right: brick.create_actor(ActorPin::C),
                tool,
                sensors,
                wheels: Mutex::new(WheelSpeeds::zero()),
                emergency: AtomicBool::new(false),
                emergency_at: Mutex::new(None),
                scheduler: Scheduler::new(),
                motion_period: brick.config().motion_period(),
            }),
        })
    }

    pub fn model(&self) -> RobotModel {
        self.shared.model
    }

    /// Activate sensors and schedule the motion task and sensor polls
    pub fn start(&self) -> Result<(), RobotError> {
        Shared::start(&self.shared)
    }

    /// Zero the drive motors and velocity, cancel every periodic task
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Ignored while an emergency stop is latched
    pub fn set_velocity(&self, x: f64, y: f64) {
        self.shared.set_velocity(Velocity::new(x, y));
    }

    /// Wheel speeds the next motion tick will apply
    pub fn wheel_speeds(&self) -> WheelSpeeds {
        *self.shared.wheels.lock()
    }

    pub fn action(&self, start: bool) {
        self.shared.action(start);
    }

    /// `true` stops the robot and latches the flag; `false` clears it
    ///
    /// Clearing also resets the sensors, so a stale bumper reading cannot
    /// latch the stop again. It does not restart anything; call `start`.
    pub fn emergency_stop(&self, stop: bool) {
        self.shared.emergency_stop(stop);
    }

    pub fn is_emergency_stop(&self) -> bool {
        self.shared.emergency.load(Ordering::Acquire)
    }

    /// When the last emergency stop happened
    pub fn emergency_stop_time(&self) -> Option<SystemTime> {
        *self.shared.emergency_at.lock()
    }

    /// Stop, then return every sensor to its initial state
    pub fn reset(&self) {
        self.shared.stop();
        for sensor in &self.shared.sensors {
            sensor.reset();
        }
    }

    pub fn sensors(&self) -> &[Arc<Sensor>] {
        &self.shared.sensors
    }

    pub fn is_running(&self) -> bool {
        self.shared.scheduler.is_scheduled(MOTION_TASK)
    }
}

impl Drop for Robot {
    fn drop(&mut self) {
        self.shared.scheduler.stop();
    }
}

impl Shared {
    fn start(this: &Arc<Self>) -> Result<(), RobotError> {
        info!("Starting robot {:?}", this.model);

        // The motion task must not keep the robot alive
        let robot: Weak<Self> = Arc::downgrade(this);
        this.scheduler.schedule(PeriodicTask::new(
            MOTION_TASK,
            Duration::ZERO,
            this.motion_period,
            move || {
                if let Some(robot) = robot.upgrade() {
                    robot.motion_tick();
                }
            },
        ))?;

        for sensor in &this.sensors {
            sensor.activate();
            let polled = Arc::clone(sensor);
            this.scheduler.schedule(PeriodicTask::new(
                format!("sensor-{:?}", sensor.pin()),
                sensor.poll_delay(),
                sensor.period(),
                move || polled.poll(),
            ))?;
        }
        Ok(())
    }

    fn motion_tick(&self) {
        if self.bumper_touched() {
            warn!("Touch sensor active, emergency stop");
            self.emergency_stop(true);
            return;
        }
        let wheels = *self.wheels.lock();
        self.drive(wheels);
    }

    fn bumper_touched(&self) -> bool {
        self.model == RobotModel::MadBot
            && self.sensors.iter().any(|sensor| {
                sensor.kind() == SensorKind::Touch && sensor.state() == SensorState::Touched(true)
            })
    }

    fn drive(&self, wheels: WheelSpeeds) {
        let (left, right) = wheels.to_motor();
        for (actor, speed) in [(&self.left, left), (&self.right, right)] {
            if let Err(e) = actor.set_speed(speed) {
                warn!("Motor {:?}: {}", actor.pin(), e);
            }
        }
    }

    fn set_velocity(&self, velocity: Velocity) {
        if self.emergency.load(Ordering::Acquire) {
            debug!("Emergency stop latched, ignoring {:?}", velocity);
            return;
        }
        let wheels = velocity_to_wheels(velocity, self.model.direction());
        debug!("Velocity {:?} -> {:?}", velocity, wheels);
        *self.wheels.lock() = wheels;
    }

    fn stop(&self) {
        info!("Stopping robot");
        self.drive(WheelSpeeds::zero());
        self.set_velocity(Velocity::default());
        self.scheduler.stop();
    }

    fn action(&self, start: bool) {
        match self.model {
            RobotModel::CastorBot => {}
            RobotModel::MadBot => {
                if !self.emergency.load(Ordering::Acquire) {
                    self.emergency_stop(true);
                }
            }
            RobotModel::ShotBot => {
                if let Some(tool) = &self.tool {
                    let speed = if start { SHOOT_SPEED } else { 0 };
                    if let Err(e) = tool.set_speed(speed) {
                        warn!("Shooter: {}", e);
                    }
                }
            }
        }
    }

    fn emergency_stop(&self, stop: bool) {
        if stop {
            self.set_velocity(EMERGENCY_VELOCITY);
            *self.emergency_at.lock() = Some(SystemTime::now());
            self.stop();
        } else {
            for sensor in &self.sensors {
                sensor.reset();
            }
        }
        self.emergency.store(stop, Ordering::Release);
        info!("Emergency stop is {}", stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brick::Command;
    use crate::brick::link::mock::MockBrick;
    use crate::config::BrickConfig;
    use std::time::Instant;

    fn brick() -> (MockBrick, Brick) {
        let (mock, connector) = MockBrick::new();
        let config = BrickConfig {
            disconnect_grace_ms: 20,
            motion_period_ms: 20,
            ..BrickConfig::default()
        };
        let brick = Brick::new(connector, config);
        brick.connect("nxt").unwrap();
        (mock, brick)
    }

    fn speed(port: u8, speed: i8) -> Command {
        Command::MotorSpeed {
            port,
            speed,
            tacho_limit: 0,
        }
    }

    async fn wait_for_command(mock: &MockBrick, command: Command) -> bool {
        let deadline = Instant::now() + Duration::from_secs(1);
        while Instant::now() < deadline {
            if mock.sent().contains(&command) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    /// GETINPUTVALUES reply for a touch sensor on port 0
    fn touch_reply(pressed: bool) -> Vec<u8> {
        let mut reply = vec![0u8; 16];
        reply[0] = 0x02;
        reply[1] = 0x07;
        reply[6] = 0x01;
        reply[13] = u8::from(pressed);
        reply
    }

    #[tokio::test]
    async fn test_requires_connected_brick() {
        let (_mock, connector) = MockBrick::new();
        let brick = Brick::new(connector, BrickConfig::default());
        assert!(matches!(
            Robot::new(&brick, RobotModel::CastorBot),
            Err(RobotError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_motion_task_drives_motors() {
        let (mock, brick) = brick();
        let robot = Robot::new(&brick, RobotModel::CastorBot).unwrap();
        robot.start().unwrap();
        assert!(robot.is_running());

        robot.set_velocity(0.0, 0.5);
        assert!(wait_for_command(&mock, speed(1, -50)).await);
        assert!(wait_for_command(&mock, speed(2, -50)).await);
        robot.stop();
        assert!(!robot.is_running());
    }

    #[tokio::test]
    async fn test_emergency_stop_latches() {
        let (mock, brick) = brick();
        let robot = Robot::new(&brick, RobotModel::CastorBot).unwrap();
        robot.start().unwrap();
        robot.set_velocity(0.0, 1.0);
        assert!(wait_for_command(&mock, speed(1, -100)).await);

        assert!(robot.emergency_stop_time().is_none());
        robot.emergency_stop(true);
        assert!(robot.is_emergency_stop());
        assert!(robot.emergency_stop_time().is_some());
        assert!(!robot.is_running());
        assert_eq!(robot.wheel_speeds(), WheelSpeeds::zero());
        assert!(wait_for_command(&mock, speed(2, 0)).await);

        robot.set_velocity(0.0, 1.0);
        assert_eq!(robot.wheel_speeds(), WheelSpeeds::zero());

        robot.emergency_stop(false);
        robot.set_velocity(0.0, 0.3);
        robot.start().unwrap();
        assert!(wait_for_command(&mock, speed(1, -30)).await);
    }

    #[tokio::test]
    async fn test_shotbot_action_runs_shooter() {
        let (mock, brick) = brick();
        let robot = Robot::new(&brick, RobotModel::ShotBot).unwrap();

        robot.action(true);
        robot.action(false);
        let sent = mock.wait_for_sent(2, Duration::from_secs(1)).await;
        assert_eq!(sent, vec![speed(0, 100), speed(0, 0)]);

        // mounted the other way round
        robot.set_velocity(0.0, 0.5);
        assert_eq!(robot.wheel_speeds().to_motor(), (50, 50));
    }

    #[tokio::test]
    async fn test_madbot_activates_and_polls_bumper() {
        let (mock, brick) = brick();
        let robot = Robot::new(&brick, RobotModel::MadBot).unwrap();
        assert_eq!(robot.sensors().len(), 1);
        robot.start().unwrap();

        assert!(
            wait_for_command(
                &mock,
                Command::SetInputMode {
                    port: 0,
                    sensor_type: 0x01,
                    mode: 0x20
                }
            )
            .await
        );
        assert!(wait_for_command(&mock, Command::ReadSensorState { port: 0 }).await);
        robot.stop();
    }

    #[tokio::test]
    async fn test_madbot_bumper_triggers_emergency_stop() {
        let (mock, brick) = brick();
        let robot = Robot::new(&brick, RobotModel::MadBot).unwrap();
        robot.start().unwrap();
        robot.set_velocity(0.0, 0.5);

        mock.reply(&touch_reply(true));
        let deadline = Instant::now() + Duration::from_secs(1);
        while !robot.is_emergency_stop() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(robot.is_emergency_stop());
        assert!(!robot.is_running());

        robot.reset();
        assert_eq!(robot.sensors()[0].state(), SensorState::Touched(false));
    }

    #[tokio::test]
    async fn test_madbot_resumes_after_bumper_release() {
        let (mock, brick) = brick();
        let robot = Robot::new(&brick, RobotModel::MadBot).unwrap();
        robot.start().unwrap();

        mock.reply(&touch_reply(true));
        let deadline = Instant::now() + Duration::from_secs(1);
        while !robot.is_emergency_stop() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(robot.is_emergency_stop());

        robot.emergency_stop(false);
        assert_eq!(robot.sensors()[0].state(), SensorState::Touched(false));
        robot.start().unwrap();
        robot.set_velocity(0.0, 0.5);

        // several motion ticks without a fresh touch reply
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!robot.is_emergency_stop());
        assert!(robot.is_running());
        assert!(wait_for_command(&mock, speed(1, -50)).await);
        robot.stop();
    }

    #[tokio::test]
    async fn test_madbot_action_is_emergency_stop() {
        let (_mock, brick) = brick();
        let robot = Robot::new(&brick, RobotModel::MadBot).unwrap();
        robot.start().unwrap();

        robot.action(true);
        assert!(robot.is_emergency_stop());
        let first = robot.emergency_stop_time();

        // already latched: no second stop
        robot.action(true);
        assert_eq!(robot.emergency_stop_time(), first);
    }
}
