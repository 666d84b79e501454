// Differential drive kinematics for two-motor NXT bases
// Converts a 2-D velocity vector (turn x, drive y) to left/right wheel speeds.

use crate::brick::actor::SPEED_LIMIT;

/// Velocity vector, each axis nominally in [-1, 1]
///
/// `x` steers (negative = left), `y` drives (positive = forward).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
}

impl Velocity {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Normalised wheel speeds, each in [-1, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelSpeeds {
    pub left: f64,
    pub right: f64,
}

impl WheelSpeeds {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Scale to motor power; truncates toward zero
    pub fn to_motor(self) -> (i32, i32) {
        (to_motor(self.left), to_motor(self.right))
    }
}

fn to_motor(speed: f64) -> i32 {
    (speed * f64::from(SPEED_LIMIT)) as i32
}

/// Limit magnitude to 1 without changing sign
fn clamp_unit(speed: f64) -> f64 {
    speed.clamp(-1.0, 1.0)
}

/// Convert a velocity vector to wheel speeds
///
/// # Arguments
/// * `velocity` - steer (x) and drive (y) components
/// * `direction` - +1 or -1 depending on how the motors are mounted
///
/// The inner wheel of a turn is slowed by |x|; the outer one keeps the
/// drive speed.
pub fn velocity_to_wheels(velocity: Velocity, direction: f64) -> WheelSpeeds {
    let drive = direction * velocity.y;

    let (left, right) = if velocity.x < 0.0 {
        (drive + velocity.x, drive)
    } else {
        (drive, drive - velocity.x)
    };

    WheelSpeeds {
        left: clamp_unit(left),
        right: clamp_unit(right),
    }
}
