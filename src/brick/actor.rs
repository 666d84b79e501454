// Motor output channel

use std::time::Duration;

use tracing::debug;

use super::ActorPin;
use super::protocol::Command;
use super::queue::CommandQueue;

/// Motor power limit in either direction
pub const SPEED_LIMIT: i32 = 100;

/// Power used by `rotate_to`
const ROTATE_SPEED: i8 = -80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Speed {value} outside [-100, 100]")]
pub struct SpeedOutOfRange {
    pub value: i32,
}

/// A motor on one of the brick's output ports
///
/// Never touches the transport; everything goes through the command queue,
/// either immediately or after the brick's communication delay.
#[derive(Clone)]
pub struct Actor {
    pin: ActorPin,
    queue: CommandQueue,
    delay: Duration,
}

impl Actor {
    pub fn new(pin: ActorPin, queue: CommandQueue, delay: Duration) -> Self {
        Self { pin, queue, delay }
    }

    pub fn pin(&self) -> ActorPin {
        self.pin
    }

    /// Set motor power in [-100, 100]; 0 lets the motor coast
    pub fn set_speed(&self, value: i32) -> Result<(), SpeedOutOfRange> {
        if !(-SPEED_LIMIT..=SPEED_LIMIT).contains(&value) {
            return Err(SpeedOutOfRange { value });
        }
        debug!("Motor {:?} speed {}", self.pin, value);
        self.submit(Command::MotorSpeed {
            port: self.pin.port(),
            speed: value as i8,
            tacho_limit: 0,
        });
        Ok(())
    }

    /// Run backwards until the tacho counter reaches `tacho_limit` degrees
    pub fn rotate_to(&self, tacho_limit: u32) {
        self.submit(Command::MotorSpeed {
            port: self.pin.port(),
            speed: ROTATE_SPEED,
            tacho_limit,
        });
    }

    /// Reset the motor's position counter
    pub fn reset(&self) {
        self.submit(Command::MotorReset {
            port: self.pin.port(),
        });
    }

    /// Request the output state; the answer arrives as a `MotorState` event
    pub fn read_state(&self) {
        self.submit(Command::ReadActorState {
            port: self.pin.port(),
        });
    }

    fn submit(&self, command: Command) {
        self.queue.submit_delayed(command, self.delay);
    }
}
