//! Register frame decoding and command encoding.
//!
//! Pure functions; short or malformed frames fall back to per-field defaults.

use crate::protocol::RegisterWrite;
use crate::types::*;

pub const REG_POWER: usize = 28;
pub const REG_MODE: usize = 29;
pub const REG_FAN: usize = 30;
pub const REG_SET_TEMP: usize = 31;
pub const REG_ERROR: usize = 35;
pub const REG_ROOM_TEMP: usize = 38;
pub const REG_PIPE_TEMP: usize = 39;
pub const REG_DAMPER: usize = 40;
pub const REG_LOCKS: [usize; 5] = [72, 73, 74, 75, 77];

pub const DEFAULT_SET_TEMP: i32 = 24;

/// Register the full onoff/mode/fan/temp tuple is written to.
pub const COMMAND_REG_ADDR: u16 = 78;
/// Register of the opaque lock write sent around commands on some firmware.
pub const LOCK_REG_ADDR: u16 = 72;
pub const LOCK_WRITE_VALUE: [i64; 6] = [2, 0, 0, 0, 0, 0];
/// Trailing command value, always zero. Meaning unknown.
const COMMAND_TRAILER: i64 = 0;
/// Unverified against hardware: inferred from the command register sitting
/// at read offset + 50 (28 -> 78). Override with
/// `HisenseClientBuilder::damper_register` once the real register is known.
pub const DEFAULT_DAMPER_REG_ADDR: u16 = 90;

pub const MIN_SET_TEMP: i32 = 16;
pub const MAX_SET_TEMP: i32 = 30;

/// Speed reported for fan codes outside the known set.
pub const FALLBACK_FAN_SPEED: FanSpeed = FanSpeed::Medium;

const OFFLINE_ERROR_CODES: [i64; 4] = [60, 61, 64, 65];

fn register(frame: &[Option<i64>], offset: usize) -> Option<i64> {
    frame.get(offset).copied().flatten()
}

pub fn decode_mode(code: i64) -> HvacMode {
    HvacMode::from_code(code).unwrap_or(HvacMode::Cool)
}

pub fn decode_fan(code: i64) -> FanSpeed {
    FanSpeed::from_code(code).unwrap_or(FALLBACK_FAN_SPEED)
}

pub fn derive_status(power: bool, error_code: i64) -> UnitStatus {
    match error_code {
        0 if power => UnitStatus::On,
        0 => UnitStatus::Off,
        c if OFFLINE_ERROR_CODES.contains(&c) => UnitStatus::Offline,
        _ => UnitStatus::Alarm,
    }
}

/// Decode one unit's register frame. `entry` supplies topology metadata when known.
pub fn decode_unit(
    address: UnitAddress,
    frame: &[Option<i64>],
    entry: Option<&TopologyEntry>,
) -> UnitState {
    let power = register(frame, REG_POWER).unwrap_or(0) == 1;
    let mode = decode_mode(register(frame, REG_MODE).unwrap_or(HvacMode::Cool.code()));
    let fan_speed = decode_fan(register(frame, REG_FAN).unwrap_or(FanSpeed::Medium.code()));
    let set_temp = register(frame, REG_SET_TEMP)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(DEFAULT_SET_TEMP);
    let error_code = register(frame, REG_ERROR).unwrap_or(0);

    let [r72, r73, r74, r75, r77] = REG_LOCKS.map(|offset| register(frame, offset).unwrap_or(0));
    let lock_registers = LockRegisters { r72, r73, r74, r75, r77 };

    UnitState {
        address,
        power,
        mode,
        fan_speed,
        set_temp,
        room_temp: register(frame, REG_ROOM_TEMP).map(|v| v as f64),
        pipe_temp: register(frame, REG_PIPE_TEMP).map(|v| v as f64),
        error_code,
        locked: lock_registers.any_set(),
        lock_registers,
        damper: register(frame, REG_DAMPER).and_then(DamperPosition::from_code),
        status: derive_status(power, error_code),
        topology: entry.cloned(),
    }
}

pub fn encode_temperature(celsius: f64) -> i64 {
    if !celsius.is_finite() {
        return i64::from(DEFAULT_SET_TEMP);
    }
    let rounded = celsius.round() as i64;
    rounded.clamp(i64::from(MIN_SET_TEMP), i64::from(MAX_SET_TEMP))
}

/// Main command values: `[onoff, mode, fan, temp, 0]`.
pub fn command_values(payload: &CommandPayload) -> Vec<i64> {
    vec![
        i64::from(payload.power),
        payload.mode.code(),
        payload.fan_speed.code(),
        encode_temperature(payload.target_temp),
        COMMAND_TRAILER,
    ]
}

/// Build the `cmdList` for one command. With `lock_write` the main write is
/// wrapped by the lock register write, as some firmware revisions require.
pub fn encode_command(
    address: UnitAddress,
    payload: &CommandPayload,
    lock_write: bool,
) -> Vec<RegisterWrite> {
    let mut values = Vec::with_capacity(3);
    if lock_write {
        values.push((LOCK_REG_ADDR, LOCK_WRITE_VALUE.to_vec()));
    }
    values.push((COMMAND_REG_ADDR, command_values(payload)));
    if lock_write {
        values.push((LOCK_REG_ADDR, LOCK_WRITE_VALUE.to_vec()));
    }
    sequence(address, values)
}

pub fn encode_damper(
    address: UnitAddress,
    position: DamperPosition,
    reg_addr: u16,
) -> Vec<RegisterWrite> {
    sequence(address, vec![(reg_addr, vec![position.code()])])
}

fn sequence(address: UnitAddress, values: Vec<(u16, Vec<i64>)>) -> Vec<RegisterWrite> {
    values
        .into_iter()
        .zip(1u32..)
        .map(|((reg_addr, reg_val), seq)| RegisterWrite {
            seq,
            sys: address.system,
            idu_addr: address.address,
            reg_addr,
            reg_val,
        })
        .collect()
}
