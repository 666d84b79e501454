// NXT direct-command protocol
//
// Every telegram on the wire is [len_lo, len_hi, payload...].
// Payload byte 0 is the telegram type (0x00 direct w/ reply, 0x80 direct
// w/o reply, 0x02 reply), byte 1 the command opcode.

use serde::Serialize;

/// Telegram type bytes
pub const DIRECT_REPLY: u8 = 0x00;
pub const DIRECT_NO_REPLY: u8 = 0x80;
pub const REPLY: u8 = 0x02;

/// Command opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    PlayTone = 0x03,
    SetOutputState = 0x04,
    SetInputMode = 0x05,
    GetOutputState = 0x06,
    GetInputValues = 0x07,
    ResetMotorPosition = 0x0A,
    LsGetStatus = 0x0E,
    LsWrite = 0x0F,
    LsRead = 0x10,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x03 => Self::PlayTone,
            0x04 => Self::SetOutputState,
            0x05 => Self::SetInputMode,
            0x06 => Self::GetOutputState,
            0x07 => Self::GetInputValues,
            0x0A => Self::ResetMotorPosition,
            0x0E => Self::LsGetStatus,
            0x0F => Self::LsWrite,
            0x10 => Self::LsRead,
            _ => return None,
        })
    }
}

/// Output mode bits: MOTORON | BRAKE
const MODE_MOTOR_ON_BRAKE: u8 = 0x03;
/// REGULATION_MODE_MOTOR_SPEED
const REGULATION_MOTOR_SPEED: u8 = 0x01;
/// MOTOR_RUN_STATE_RUNNING
const RUN_STATE_RUNNING: u8 = 0x20;

/// Bytes sent to the ultrasonic sensor's I2C address to request a distance
const LS_TX_DATA: [u8; 2] = [0x02, 0x42];
/// Bytes the ultrasonic sensor answers with
const LS_RX_LEN: u8 = 1;

/// Error types for frame decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("Length prefix says {declared} bytes, {actual} available")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Unknown telegram 0x{kind:02X} 0x{opcode:02X}")]
    UnknownOpcode { kind: u8, opcode: u8 },

    #[error("Payload of {len} bytes does not fit the 2-byte length prefix")]
    TooLong { len: usize },
}

/// Outbound direct command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Beep { frequency: u16, duration_ms: u16 },
    MotorSpeed { port: u8, speed: i8, tacho_limit: u32 },
    MotorReset { port: u8 },
    ReadActorState { port: u8 },
    ReadSensorState { port: u8 },
    SetInputMode { port: u8, sensor_type: u8, mode: u8 },
    LowSpeedWrite { port: u8 },
    LowSpeedStatus { port: u8 },
    LowSpeedRead { port: u8 },
}

impl Command {
    /// Encode the command payload (without length prefix)
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Command::Beep {
                frequency,
                duration_ms,
            } => encode_beep(frequency, duration_ms).to_vec(),
            Command::MotorSpeed {
                port,
                speed,
                tacho_limit,
            } => encode_motor_speed(port, speed, tacho_limit).to_vec(),
            Command::MotorReset { port } => encode_reset(port).to_vec(),
            Command::ReadActorState { port } => encode_read_actor_state(port).to_vec(),
            Command::ReadSensorState { port } => encode_read_sensor_state(port).to_vec(),
            Command::SetInputMode {
                port,
                sensor_type,
                mode,
            } => encode_set_input_mode(port, sensor_type, mode).to_vec(),
            Command::LowSpeedWrite { port } => encode_ls_write(port).to_vec(),
            Command::LowSpeedStatus { port } => encode_ls_status(port).to_vec(),
            Command::LowSpeedRead { port } => encode_ls_read(port).to_vec(),
        }
    }

    /// Whether the brick answers this command with a reply telegram
    pub fn expects_reply(&self) -> bool {
        !matches!(
            self,
            Command::Beep { .. }
                | Command::MotorSpeed { .. }
                | Command::MotorReset { .. }
                | Command::SetInputMode { .. }
        )
    }
}

pub fn encode_beep(frequency: u16, duration_ms: u16) -> [u8; 6] {
    let [f_lo, f_hi] = frequency.to_le_bytes();
    let [d_lo, d_hi] = duration_ms.to_le_bytes();
    [
        DIRECT_NO_REPLY,
        Opcode::PlayTone as u8,
        f_lo,
        f_hi,
        d_lo,
        d_hi,
    ]
}

/// SETOUTPUTSTATE. Speed 0 coasts: mode, regulation, turn ratio and run
/// state are all cleared.
pub fn encode_motor_speed(port: u8, speed: i8, tacho_limit: u32) -> [u8; 12] {
    let mut message = [0u8; 12];
    message[0] = DIRECT_NO_REPLY;
    message[1] = Opcode::SetOutputState as u8;
    message[2] = port;

    if speed != 0 {
        message[3] = speed as u8;
        message[4] = MODE_MOTOR_ON_BRAKE;
        message[5] = REGULATION_MOTOR_SPEED;
        message[6] = 0x00; // turn ratio
        message[7] = RUN_STATE_RUNNING;
    }

    // 0 = run forever
    message[8..12].copy_from_slice(&tacho_limit.to_le_bytes());
    message
}

pub fn encode_reset(port: u8) -> [u8; 4] {
    // last byte: relative (1) / absolute (0) position
    [DIRECT_NO_REPLY, Opcode::ResetMotorPosition as u8, port, 0]
}

pub fn encode_read_actor_state(port: u8) -> [u8; 3] {
    [DIRECT_REPLY, Opcode::GetOutputState as u8, port]
}

pub fn encode_read_sensor_state(port: u8) -> [u8; 3] {
    [DIRECT_REPLY, Opcode::GetInputValues as u8, port]
}

pub fn encode_set_input_mode(port: u8, sensor_type: u8, mode: u8) -> [u8; 5] {
    [DIRECT_REPLY, Opcode::SetInputMode as u8, port, sensor_type, mode]
}

pub fn encode_ls_write(port: u8) -> [u8; 7] {
    [
        DIRECT_REPLY,
        Opcode::LsWrite as u8,
        port,
        LS_TX_DATA.len() as u8,
        LS_RX_LEN,
        LS_TX_DATA[0],
        LS_TX_DATA[1],
    ]
}

pub fn encode_ls_status(port: u8) -> [u8; 3] {
    [DIRECT_REPLY, Opcode::LsGetStatus as u8, port]
}

pub fn encode_ls_read(port: u8) -> [u8; 3] {
    [DIRECT_REPLY, Opcode::LsRead as u8, port]
}

/// Prepend the 2-byte little-endian length prefix
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let length = u16::try_from(payload.len())
        .map_err(|_| ProtocolError::TooLong { len: payload.len() })?;
    let mut framed = Vec::with_capacity(2 + payload.len());
    framed.extend_from_slice(&length.to_le_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Reply telegram, borrowed from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedReply<'a> {
    /// Echoed command opcode (payload byte 1)
    pub opcode: u8,
    /// Whole payload including the 0x02 marker and opcode
    pub payload: &'a [u8],
}

/// Result of decoding one payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<'a> {
    Reply(ParsedReply<'a>),
    Command(Command),
    Unrecognized,
}

/// Decode a length-prefixed frame
pub fn decode_frame(bytes: &[u8]) -> Result<Decoded<'_>, ProtocolError> {
    if bytes.len() < 2 {
        return Err(ProtocolError::TooShort { len: bytes.len() });
    }
    let declared = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let payload = &bytes[2..];
    if payload.len() != declared {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    Ok(decode_payload(payload))
}

/// Decode a payload (length prefix already stripped)
pub fn decode_payload(payload: &[u8]) -> Decoded<'_> {
    if payload.len() < 2 {
        return Decoded::Unrecognized;
    }
    if payload[0] == REPLY {
        return Decoded::Reply(ParsedReply {
            opcode: payload[1],
            payload,
        });
    }
    match decode_command(payload) {
        Ok(command) => Decoded::Command(command),
        Err(_) => Decoded::Unrecognized,
    }
}

/// Decode an outbound command payload back into a [`Command`]
pub fn decode_command(payload: &[u8]) -> Result<Command, ProtocolError> {
    if payload.len() < 2 {
        return Err(ProtocolError::TooShort { len: payload.len() });
    }
    let (kind, opcode) = (payload[0], payload[1]);
    let unknown = ProtocolError::UnknownOpcode { kind, opcode };
    let Some(op) = Opcode::from_byte(opcode) else {
        return Err(unknown);
    };

    let expected_kind = match op {
        Opcode::PlayTone | Opcode::SetOutputState | Opcode::ResetMotorPosition => DIRECT_NO_REPLY,
        _ => DIRECT_REPLY,
    };
    if kind != expected_kind {
        return Err(unknown);
    }

    let expected_len = match op {
        Opcode::PlayTone => 6,
        Opcode::SetOutputState => 12,
        Opcode::ResetMotorPosition => 4,
        Opcode::SetInputMode => 5,
        Opcode::LsWrite => 7,
        Opcode::GetOutputState | Opcode::GetInputValues | Opcode::LsGetStatus | Opcode::LsRead => 3,
    };
    if payload.len() != expected_len {
        return Err(ProtocolError::LengthMismatch {
            declared: expected_len,
            actual: payload.len(),
        });
    }

    let port = payload[2];
    Ok(match op {
        Opcode::PlayTone => Command::Beep {
            frequency: u16::from_le_bytes([payload[2], payload[3]]),
            duration_ms: u16::from_le_bytes([payload[4], payload[5]]),
        },
        Opcode::SetOutputState => Command::MotorSpeed {
            port,
            speed: payload[3] as i8,
            tacho_limit: u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]),
        },
        Opcode::ResetMotorPosition => Command::MotorReset { port },
        Opcode::GetOutputState => Command::ReadActorState { port },
        Opcode::GetInputValues => Command::ReadSensorState { port },
        Opcode::SetInputMode => Command::SetInputMode {
            port,
            sensor_type: payload[3],
            mode: payload[4],
        },
        Opcode::LsWrite => Command::LowSpeedWrite { port },
        Opcode::LsGetStatus => Command::LowSpeedStatus { port },
        Opcode::LsRead => Command::LowSpeedRead { port },
    })
}
