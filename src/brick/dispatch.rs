// Route reply telegrams to events
//
// Each inbound reply produces at most one event: opcode and length are
// matched together, so a status-shaped frame is never also read as a
// write ack.

use super::events::{BrickEvent, MotorState};
use super::protocol::{Decoded, Opcode, ParsedReply, decode_payload};

const OUTPUT_STATE_MIN_LEN: usize = 25;
const INPUT_VALUES_MIN_LEN: usize = 16;
const LS_STATUS_LEN: usize = 4;
const LS_WRITE_LEN: usize = 3;
const LS_READ_LEN: usize = 20;

/// Decode a received payload and route it; `None` for anything ignored
pub fn dispatch(payload: &[u8]) -> Option<BrickEvent> {
    match decode_payload(payload) {
        Decoded::Reply(reply) => route(reply),
        _ => None,
    }
}

pub fn route(reply: ParsedReply<'_>) -> Option<BrickEvent> {
    let p = reply.payload;
    let len = p.len();

    match Opcode::from_byte(reply.opcode)? {
        Opcode::GetOutputState if len >= OUTPUT_STATE_MIN_LEN => {
            Some(BrickEvent::MotorState(decode_output_state(p)))
        }
        Opcode::GetInputValues if len >= INPUT_VALUES_MIN_LEN => Some(BrickEvent::InputState {
            port: p[3],
            sensor_type: p[6],
            // scaled value, transmitted big-endian by this firmware
            value: i16::from_be_bytes([p[12], p[13]]),
        }),
        Opcode::LsGetStatus if len == LS_STATUS_LEN => Some(BrickEvent::LsStatus {
            status: p[2],
            bytes_ready: p[3],
        }),
        Opcode::LsWrite if len == LS_WRITE_LEN => Some(BrickEvent::LsWrite { status: p[2] }),
        Opcode::LsRead if len == LS_READ_LEN => Some(BrickEvent::LsRead {
            status: p[2],
            bytes_read: p[3],
            data: p[4],
        }),
        _ => None,
    }
}

fn decode_output_state(p: &[u8]) -> MotorState {
    let u32_at = |i: usize| u32::from_le_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]]);
    MotorState {
        port: p[3],
        power: p[4] as i8,
        mode: p[5],
        regulation: p[6],
        turn_ratio: p[7] as i8,
        run_state: p[8],
        tacho_limit: u32_at(9),
        tacho_count: u32_at(13) as i32,
        block_tacho_count: u32_at(17) as i32,
        rotation_count: u32_at(21) as i32,
    }
}
