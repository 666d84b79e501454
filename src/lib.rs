// Control client for LEGO NXT robots, bridged onto zenoh
//
// `brick` speaks the NXT direct-command protocol over a serial link,
// `robot` turns velocity vectors into motor commands on a schedule, and
// `runtime` connects both to zenoh topics.

pub mod brick;
pub mod config;
pub mod messages;
pub mod robot;
pub mod runtime;

pub use brick::Brick;
pub use config::BrickConfig;
pub use robot::{Robot, RobotError, RobotModel};
