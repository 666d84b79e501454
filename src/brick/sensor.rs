// Sensors on the brick's input ports
//
// Each variant is a plain value type implementing `SensorDecode`; a
// `Sensor` handle wraps one behind its own mutex, subscribes it to the
// brick's events and submits its poll commands to the queue.
//
// Sensor state is written by the reader thread (events) and by the
// sensor's poll task. Both only ever touch this one sensor, so the lock is
// per sensor, never global.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::SensorPin;
use super::events::{BrickEvent, EventBus, ListenerId};
use super::protocol::Command;
use super::queue::CommandQueue;

/// Delay before the first poll of a generic sensor
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(5);
/// Delay before the first ultrasonic low-speed cycle
pub const ULTRASONIC_POLL_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Touch,
    Light,
    Ultrasonic,
    Color,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Touch,
        SensorKind::Light,
        SensorKind::Ultrasonic,
        SensorKind::Color,
    ];

    /// Factory: the fresh decode state for this kind
    pub fn instantiate(self) -> SensorModel {
        match self {
            SensorKind::Touch => SensorModel::Touch(TouchSensor::default()),
            SensorKind::Light => SensorModel::Light(LightSensor::default()),
            SensorKind::Ultrasonic => SensorModel::Ultrasonic(UltrasonicSensor::default()),
            SensorKind::Color => SensorModel::Color(ColorSensor::default()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Black,
    Blue,
    Green,
    Yellow,
    Red,
    White,
    Undefined,
}

impl Color {
    /// 1-based color index as reported by the color sensor
    pub fn from_index(index: i8) -> Self {
        match index {
            1 => Color::Black,
            2 => Color::Blue,
            3 => Color::Green,
            4 => Color::Yellow,
            5 => Color::Red,
            6 => Color::White,
            _ => Color::Undefined,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SensorState {
    Touched(bool),
    Light(i16),
    /// Centimetres, -1 when there is no valid reading
    Distance(i16),
    Color(Color),
}

/// Capability every sensor variant provides
pub trait SensorDecode {
    /// NXT sensor type byte for SETINPUTMODE
    const SENSOR_TYPE: u8;
    /// NXT sensor mode byte for SETINPUTMODE
    const SENSOR_MODE: u8;
    const POLL_DELAY: Duration = DEFAULT_POLL_DELAY;

    fn decode(&mut self, pin: SensorPin, event: &BrickEvent);

    fn state(&self) -> SensorState;

    fn reset(&mut self) {}

    fn poll_command(&self, pin: SensorPin) -> Command {
        Command::ReadSensorState { port: pin.port() }
    }
}

/// Value of an input-state event addressed to this port and sensor type
fn input_value(pin: SensorPin, sensor_type: u8, event: &BrickEvent) -> Option<i16> {
    match *event {
        BrickEvent::InputState {
            port,
            sensor_type: t,
            value,
        } if port == pin.port() && t == sensor_type => Some(value),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct TouchSensor {
    touched: bool,
}

impl SensorDecode for TouchSensor {
    const SENSOR_TYPE: u8 = 0x01; // SWITCH
    const SENSOR_MODE: u8 = 0x20; // BOOLEANMODE

    fn decode(&mut self, pin: SensorPin, event: &BrickEvent) {
        if let Some(value) = input_value(pin, Self::SENSOR_TYPE, event) {
            self.touched = value > 0;
        }
    }

    fn state(&self) -> SensorState {
        SensorState::Touched(self.touched)
    }

    fn reset(&mut self) {
        self.touched = false;
    }
}

#[derive(Debug, Clone, Default)]
pub struct LightSensor {
    value: i16,
}

impl SensorDecode for LightSensor {
    const SENSOR_TYPE: u8 = 0x05; // LIGHT_ACTIVE
    const SENSOR_MODE: u8 = 0x00; // RAWMODE

    fn decode(&mut self, pin: SensorPin, event: &BrickEvent) {
        if let Some(value) = input_value(pin, Self::SENSOR_TYPE, event) {
            self.value = value;
        }
    }

    fn state(&self) -> SensorState {
        SensorState::Light(self.value)
    }
}

#[derive(Debug, Clone)]
pub struct ColorSensor {
    color: Color,
}

impl Default for ColorSensor {
    fn default() -> Self {
        Self {
            color: Color::Undefined,
        }
    }
}

impl SensorDecode for ColorSensor {
    const SENSOR_TYPE: u8 = 0x0D; // COLORFULL
    const SENSOR_MODE: u8 = 0x00; // RAWMODE

    fn decode(&mut self, pin: SensorPin, event: &BrickEvent) {
        if let Some(value) = input_value(pin, Self::SENSOR_TYPE, event) {
            self.color = Color::from_index((value >> 8) as i8);
        }
    }

    fn state(&self) -> SensorState {
        SensorState::Color(self.color)
    }
}

/// Phase of the low-speed (I2C) read cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LsState {
    /// Next tick sends LSWRITE
    #[default]
    Ready,
    /// Write acknowledged; each tick sends LSGETSTATUS
    WaitingForResult,
    /// Bytes are ready; next tick sends LSREAD
    Reading,
}

#[derive(Debug, Clone)]
pub struct UltrasonicSensor {
    ls_state: LsState,
    distance: i16,
}

impl Default for UltrasonicSensor {
    fn default() -> Self {
        Self {
            ls_state: LsState::Ready,
            distance: -1,
        }
    }
}

impl UltrasonicSensor {
    pub fn ls_state(&self) -> LsState {
        self.ls_state
    }

    fn switch_state(&mut self, next: LsState) {
        debug!("Low-speed state {:?} -> {:?}", self.ls_state, next);
        self.ls_state = next;
    }
}

impl SensorDecode for UltrasonicSensor {
    const SENSOR_TYPE: u8 = 0x0B; // LOWSPEED_9V
    const SENSOR_MODE: u8 = 0x00; // RAWMODE
    const POLL_DELAY: Duration = ULTRASONIC_POLL_DELAY;

    // Replies that do not fit the current phase are stale and dropped;
    // the poll task re-sends the current phase's request every tick.
    fn decode(&mut self, _pin: SensorPin, event: &BrickEvent) {
        match (self.ls_state, event) {
            (LsState::Ready, BrickEvent::LsWrite { .. }) => {
                self.switch_state(LsState::WaitingForResult);
            }
            (LsState::WaitingForResult, BrickEvent::LsStatus { bytes_ready, .. })
                if *bytes_ready > 0 =>
            {
                self.switch_state(LsState::Reading);
            }
            (
                LsState::Reading,
                BrickEvent::LsRead {
                    status,
                    bytes_read,
                    data,
                },
            ) => {
                self.distance = if *status == 0 && *bytes_read > 0 {
                    i16::from(*data)
                } else {
                    -1
                };
                info!("Distance is {} cm", self.distance);
                self.switch_state(LsState::Ready);
            }
            _ => {}
        }
    }

    fn state(&self) -> SensorState {
        SensorState::Distance(self.distance)
    }

    fn poll_command(&self, pin: SensorPin) -> Command {
        let port = pin.port();
        match self.ls_state {
            LsState::Ready => Command::LowSpeedWrite { port },
            LsState::WaitingForResult => Command::LowSpeedStatus { port },
            LsState::Reading => Command::LowSpeedRead { port },
        }
    }
}

/// Tagged union over the sensor variants
#[derive(Debug, Clone)]
pub enum SensorModel {
    Touch(TouchSensor),
    Light(LightSensor),
    Color(ColorSensor),
    Ultrasonic(UltrasonicSensor),
}

macro_rules! each_model {
    ($model:expr, $sensor:ident => $body:expr) => {
        match $model {
            SensorModel::Touch($sensor) => $body,
            SensorModel::Light($sensor) => $body,
            SensorModel::Color($sensor) => $body,
            SensorModel::Ultrasonic($sensor) => $body,
        }
    };
}

fn type_mode_delay<T: SensorDecode>(_: &T) -> (u8, u8, Duration) {
    (T::SENSOR_TYPE, T::SENSOR_MODE, T::POLL_DELAY)
}

impl SensorModel {
    pub fn sensor_type(&self) -> u8 {
        each_model!(self, s => type_mode_delay(s).0)
    }

    pub fn sensor_mode(&self) -> u8 {
        each_model!(self, s => type_mode_delay(s).1)
    }

    pub fn poll_delay(&self) -> Duration {
        each_model!(self, s => type_mode_delay(s).2)
    }

    pub fn decode(&mut self, pin: SensorPin, event: &BrickEvent) {
        each_model!(self, s => s.decode(pin, event))
    }

    pub fn state(&self) -> SensorState {
        each_model!(self, s => s.state())
    }

    pub fn reset(&mut self) {
        each_model!(self, s => s.reset())
    }

    pub fn poll_command(&self, pin: SensorPin) -> Command {
        each_model!(self, s => s.poll_command(pin))
    }
}

/// A sensor attached to one input port
///
/// Listens to brick events for as long as it lives.
pub struct Sensor {
    kind: SensorKind,
    pin: SensorPin,
    period: Duration,
    model: Arc<Mutex<SensorModel>>,
    queue: CommandQueue,
    events: EventBus,
    subscription: ListenerId,
}

impl Sensor {
    pub fn new(
        kind: SensorKind,
        pin: SensorPin,
        period: Duration,
        queue: CommandQueue,
        events: EventBus,
    ) -> Self {
        let model = Arc::new(Mutex::new(kind.instantiate()));
        let subscription = {
            let model = Arc::clone(&model);
            events.subscribe(move |event| model.lock().decode(pin, event))
        };

        Self {
            kind,
            pin,
            period,
            model,
            queue,
            events,
            subscription,
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn pin(&self) -> SensorPin {
        self.pin
    }

    /// Poll period
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Delay before the first poll
    pub fn poll_delay(&self) -> Duration {
        self.model.lock().poll_delay()
    }

    /// Configure the input port for this sensor's type and mode
    pub fn activate(&self) {
        let (sensor_type, mode) = {
            let model = self.model.lock();
            (model.sensor_type(), model.sensor_mode())
        };
        info!(
            "Activating {:?} sensor on port {} (type 0x{:02X}, mode 0x{:02X})",
            self.kind,
            self.pin.port(),
            sensor_type,
            mode
        );
        self.queue.submit(Command::SetInputMode {
            port: self.pin.port(),
            sensor_type,
            mode,
        });
    }

    /// One poll tick
    pub fn poll(&self) {
        let command = self.model.lock().poll_command(self.pin);
        self.queue.submit(command);
    }

    pub fn state(&self) -> SensorState {
        self.model.lock().state()
    }

    pub fn reset(&self) {
        self.model.lock().reset();
    }

    /// Low-speed phase, for ultrasonic sensors
    pub fn ls_state(&self) -> Option<LsState> {
        match &*self.model.lock() {
            SensorModel::Ultrasonic(sensor) => Some(sensor.ls_state()),
            _ => None,
        }
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        self.events.unsubscribe(self.subscription);
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("kind", &self.kind)
            .field("pin", &self.pin)
            .field("period", &self.period)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brick::link::Link;
    use crate::brick::link::mock::MockBrick;

    fn input(port: u8, sensor_type: u8, value: i16) -> BrickEvent {
        BrickEvent::InputState {
            port,
            sensor_type,
            value,
        }
    }

    #[test]
    fn test_touch_decode_and_reset() {
        let mut touch = TouchSensor::default();
        touch.decode(SensorPin::S1, &input(0, 0x01, 1023));
        assert_eq!(touch.state(), SensorState::Touched(true));

        // other port / other type ignored
        touch.decode(SensorPin::S1, &input(1, 0x01, 0));
        touch.decode(SensorPin::S1, &input(0, 0x05, 0));
        assert_eq!(touch.state(), SensorState::Touched(true));

        touch.decode(SensorPin::S1, &input(0, 0x01, 0));
        assert_eq!(touch.state(), SensorState::Touched(false));

        touch.decode(SensorPin::S1, &input(0, 0x01, 1));
        touch.reset();
        assert_eq!(touch.state(), SensorState::Touched(false));
    }

    #[test]
    fn test_light_decodes_verbatim() {
        let mut light = LightSensor::default();
        light.decode(SensorPin::S3, &input(2, 0x05, -17));
        assert_eq!(light.state(), SensorState::Light(-17));
    }

    #[test]
    fn test_color_index_from_high_byte() {
        let mut color = ColorSensor::default();
        assert_eq!(color.state(), SensorState::Color(Color::Undefined));

        color.decode(SensorPin::S2, &input(1, 0x0D, 0x0300));
        assert_eq!(color.state(), SensorState::Color(Color::Green));

        color.decode(SensorPin::S2, &input(1, 0x0D, 0x06FF));
        assert_eq!(color.state(), SensorState::Color(Color::White));

        for out_of_range in [0x0000, 0x0700, -0x0100] {
            color.decode(SensorPin::S2, &input(1, 0x0D, out_of_range));
            assert_eq!(color.state(), SensorState::Color(Color::Undefined));
        }
    }

    #[test]
    fn test_ultrasonic_cycle() {
        let pin = SensorPin::S4;
        let mut sonar = UltrasonicSensor::default();
        assert_eq!(sonar.ls_state(), LsState::Ready);
        assert_eq!(sonar.state(), SensorState::Distance(-1));
        assert_eq!(sonar.poll_command(pin), Command::LowSpeedWrite { port: 3 });

        sonar.decode(pin, &BrickEvent::LsWrite { status: 0 });
        assert_eq!(sonar.ls_state(), LsState::WaitingForResult);
        assert_eq!(sonar.poll_command(pin), Command::LowSpeedStatus { port: 3 });

        // nothing ready yet: keep asking
        sonar.decode(
            pin,
            &BrickEvent::LsStatus {
                status: 0,
                bytes_ready: 0,
            },
        );
        assert_eq!(sonar.ls_state(), LsState::WaitingForResult);

        sonar.decode(
            pin,
            &BrickEvent::LsStatus {
                status: 0,
                bytes_ready: 1,
            },
        );
        assert_eq!(sonar.ls_state(), LsState::Reading);
        assert_eq!(sonar.poll_command(pin), Command::LowSpeedRead { port: 3 });

        sonar.decode(
            pin,
            &BrickEvent::LsRead {
                status: 0,
                bytes_read: 1,
                data: 42,
            },
        );
        assert_eq!(sonar.ls_state(), LsState::Ready);
        assert_eq!(sonar.state(), SensorState::Distance(42));
    }

    #[test]
    fn test_ultrasonic_failed_read_and_far_distance() {
        let pin = SensorPin::S1;
        let mut sonar = UltrasonicSensor::default();
        let reading = |status, data| BrickEvent::LsRead {
            status,
            bytes_read: 1,
            data,
        };
        let ready = BrickEvent::LsStatus {
            status: 0,
            bytes_ready: 1,
        };

        for event in [BrickEvent::LsWrite { status: 0 }, ready.clone(), reading(0, 200)] {
            sonar.decode(pin, &event);
        }
        assert_eq!(sonar.state(), SensorState::Distance(200));

        for event in [BrickEvent::LsWrite { status: 0 }, ready, reading(0xE0, 42)] {
            sonar.decode(pin, &event);
        }
        assert_eq!(sonar.state(), SensorState::Distance(-1));
        assert_eq!(sonar.ls_state(), LsState::Ready);
    }

    #[test]
    fn test_ultrasonic_ignores_out_of_phase_replies() {
        let pin = SensorPin::S1;
        let mut sonar = UltrasonicSensor::default();

        sonar.decode(
            pin,
            &BrickEvent::LsRead {
                status: 0,
                bytes_read: 1,
                data: 9,
            },
        );
        sonar.decode(
            pin,
            &BrickEvent::LsStatus {
                status: 0,
                bytes_ready: 1,
            },
        );
        assert_eq!(sonar.ls_state(), LsState::Ready);
        assert_eq!(sonar.state(), SensorState::Distance(-1));
    }

    #[test]
    fn test_factory_types_and_modes() {
        let expected = [
            (SensorKind::Touch, 0x01, 0x20),
            (SensorKind::Light, 0x05, 0x00),
            (SensorKind::Ultrasonic, 0x0B, 0x00),
            (SensorKind::Color, 0x0D, 0x00),
        ];
        for (kind, sensor_type, mode) in expected {
            let model = kind.instantiate();
            assert_eq!(model.sensor_type(), sensor_type);
            assert_eq!(model.sensor_mode(), mode);
        }
        assert_eq!(
            SensorKind::Ultrasonic.instantiate().poll_delay(),
            ULTRASONIC_POLL_DELAY
        );
        assert_eq!(SensorKind::Touch.instantiate().poll_delay(), DEFAULT_POLL_DELAY);
    }

    #[tokio::test]
    async fn test_sensor_handle_follows_events() {
        let (brick, connector) = MockBrick::new();
        let events = EventBus::new();
        let link = Arc::new(Link::new(connector, events.clone()));
        link.connect("nxt").unwrap();
        let (queue, _consumer) = CommandQueue::spawn(link, Duration::from_millis(10));

        let sonar = Sensor::new(
            SensorKind::Ultrasonic,
            SensorPin::S2,
            Duration::from_millis(100),
            queue,
            events.clone(),
        );
        sonar.activate();
        sonar.poll();
        brick.reply(&[0x02, 0x0F, 0x00]);

        brick.wait_for_sent(2, Duration::from_secs(1)).await;
        for _ in 0..100 {
            if sonar.ls_state() == Some(LsState::WaitingForResult) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sonar.ls_state(), Some(LsState::WaitingForResult));
        sonar.poll();
        let sent = brick.wait_for_sent(3, Duration::from_secs(1)).await;

        assert_eq!(
            sent,
            vec![
                Command::SetInputMode {
                    port: 1,
                    sensor_type: 0x0B,
                    mode: 0
                },
                Command::LowSpeedWrite { port: 1 },
                Command::LowSpeedStatus { port: 1 },
            ]
        );

        assert_eq!(events.len(), 1);
        drop(sonar);
        assert!(events.is_empty());
    }
}
