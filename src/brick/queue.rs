// Command queue: the single serialization point for outbound telegrams
//
// Any number of producers (actors, sensors, scheduler tasks, callers)
// submit `Command`s; one consumer task encodes them and writes through the
// link in FIFO order. A disconnect request travels on a separate control
// channel that the consumer always checks first.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ActorPin;
use super::events::BrickEvent;
use super::link::Link;
use super::protocol::{Command, encode_motor_speed};

#[derive(Debug)]
enum Control {
    /// Completion is signalled once the transport is closed
    Disconnect(Option<oneshot::Sender<()>>),
}

/// Producer handle; cheap to clone
#[derive(Clone)]
pub struct CommandQueue {
    commands: mpsc::UnboundedSender<Command>,
    control: mpsc::UnboundedSender<Control>,
    runtime: Handle,
}

impl CommandQueue {
    /// Spawn the consumer on the current Tokio runtime
    ///
    /// The consumer runs until every `CommandQueue` clone is dropped.
    /// `grace` is how long the disconnect sequence waits between the motor
    /// stop telegrams and closing the transport.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(link: Arc<Link>, grace: Duration) -> (Self, JoinHandle<()>) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (control, control_rx) = mpsc::unbounded_channel();
        let runtime = Handle::current();
        let consumer = runtime.spawn(consume(link, commands_rx, control_rx, grace));

        let queue = Self {
            commands,
            control,
            runtime,
        };
        (queue, consumer)
    }

    /// Enqueue a command. Returns false once the consumer has stopped.
    pub fn submit(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Enqueue a command after `delay`
    pub fn submit_delayed(&self, command: Command, delay: Duration) {
        if delay.is_zero() {
            self.submit(command);
            return;
        }
        let commands = self.commands.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(command);
        });
    }

    /// Ask the consumer to run the disconnect sequence ahead of any queued
    /// commands
    pub fn disconnect(&self) -> bool {
        self.control.send(Control::Disconnect(None)).is_ok()
    }

    /// `disconnect`, then wait for the sequence to finish
    pub async fn disconnect_and_wait(&self) {
        let (done, finished) = oneshot::channel();
        if self.control.send(Control::Disconnect(Some(done))).is_ok() {
            let _ = finished.await;
        }
    }
}

async fn consume(
    link: Arc<Link>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut control: mpsc::UnboundedReceiver<Control>,
    grace: Duration,
) {
    debug!("Command queue consumer started");

    loop {
        tokio::select! {
            biased;

            Some(message) = control.recv() => match message {
                Control::Disconnect(done) => {
                    shutdown(&link, grace).await;
                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                }
            },

            command = commands.recv() => match command {
                Some(command) => deliver(&link, &command),
                None => break,
            },
        }
    }

    debug!("Command queue consumer stopped");
}

fn deliver(link: &Link, command: &Command) {
    debug!("Sending {:?}", command);
    if !link.send(&command.encode()) {
        if let Command::SetInputMode { port, .. } = command {
            warn!("Failed to set input mode on port {}", port);
            link.events().emit(&BrickEvent::Toast {
                text: "Problem setting sensor!".to_string(),
            });
        }
    }
}

/// Stop every motor, let the telegrams drain, then close the transport
async fn shutdown(link: &Link, grace: Duration) {
    if !link.has_transport() {
        debug!("Disconnect requested without an open link");
        return;
    }

    info!("Disconnecting: stopping all motors");
    link.begin_close();
    stop_all_motors(link);

    tokio::time::sleep(grace).await;
    link.close();
}

/// Write a zero-speed telegram to every output port, bypassing the queue
pub(crate) fn stop_all_motors(link: &Link) {
    for pin in ActorPin::ALL {
        link.send(&encode_motor_speed(pin.port(), 0, 0));
    }
}
