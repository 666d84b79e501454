// NXT brick: link, command queue and events behind one handle

pub mod actor;
pub mod dispatch;
pub mod events;
pub mod link;
pub mod protocol;
pub mod queue;
pub mod sensor;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::BrickConfig;

pub use actor::{Actor, SpeedOutOfRange};
pub use events::{BrickEvent, EventBus, ListenerId, MotorState};
pub use link::{ConnectionState, Connector, Link, LinkError, SerialConnector};
pub use protocol::Command;
pub use queue::CommandQueue;
pub use sensor::{Color, LsState, Sensor, SensorKind, SensorState};

/// Output port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorPin {
    A = 0,
    B = 1,
    C = 2,
}

impl ActorPin {
    pub const ALL: [ActorPin; 3] = [ActorPin::A, ActorPin::B, ActorPin::C];

    pub fn port(self) -> u8 {
        self as u8
    }
}

/// Input port; S1 is port 0 on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorPin {
    S1 = 0,
    S2 = 1,
    S3 = 2,
    S4 = 3,
}

impl SensorPin {
    pub fn port(self) -> u8 {
        self as u8
    }
}

pub struct Brick {
    link: Arc<Link>,
    queue: CommandQueue,
    events: EventBus,
    config: BrickConfig,
    consumer: JoinHandle<()>,
}

impl Brick {
    /// Build the link and start the command queue consumer
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn new(connector: impl Connector + 'static, config: BrickConfig) -> Self {
        let events = EventBus::new();
        let link = Arc::new(Link::new(connector, events.clone()));
        let (queue, consumer) = CommandQueue::spawn(Arc::clone(&link), config.disconnect_grace());

        Self {
            link,
            queue,
            events,
            config,
            consumer,
        }
    }

    /// Brick reached over a serial device
    pub fn serial(config: BrickConfig) -> Self {
        let connector = SerialConnector::new(config.baud_rate, config.read_timeout());
        Self::new(connector, config)
    }

    pub fn connect(&self, address: &str) -> Result<(), LinkError> {
        self.link.connect(address)
    }

    /// Stop all three motors, wait the grace period, close the transport
    ///
    /// Runs on the queue consumer ahead of anything still queued. A read
    /// failure caused by the close is not reported.
    pub fn disconnect(&self) {
        info!("Disconnect requested");
        self.link.begin_close();
        self.queue.disconnect();
    }

    /// `disconnect` and wait until the transport is closed
    pub async fn shutdown(&self) {
        info!("Shutting down brick link");
        self.link.begin_close();
        self.queue.disconnect_and_wait().await;
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn config(&self) -> &BrickConfig {
        &self.config
    }

    pub fn create_actor(&self, pin: ActorPin) -> Actor {
        Actor::new(pin, self.queue.clone(), self.config.communication_delay())
    }

    pub fn create_sensor(&self, kind: SensorKind, pin: SensorPin) -> Sensor {
        self.create_sensor_with_period(kind, pin, self.config.sensor_poll_period())
    }

    pub fn create_sensor_with_period(
        &self,
        kind: SensorKind,
        pin: SensorPin,
        period: Duration,
    ) -> Sensor {
        Sensor::new(kind, pin, period, self.queue.clone(), self.events.clone())
    }

    pub fn beep(&self, frequency: u16, duration_ms: u16) {
        self.queue.submit(Command::Beep {
            frequency,
            duration_ms,
        });
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&BrickEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }
}

impl Drop for Brick {
    /// Stops the motors and closes the link without the grace period
    fn drop(&mut self) {
        // Delayed submissions hold queue clones; don't wait for them
        self.consumer.abort();
        if self.link.has_transport() {
            warn!("Brick dropped while connected, stopping motors");
            self.link.begin_close();
            queue::stop_all_motors(&self.link);
            self.link.close();
        }
    }
}
