//! OPL3 register map: channel and operator lookup tables, the functional
//! register families, and the synthetic opcode range the OPB container layers
//! on top of the chip's address space.

use bitflags::bitflags;

use crate::dtype::NUM_CHANNELS;

pub const REG_CHARACTER: u16 = 0x20;
pub const REG_LEVELS: u16 = 0x40;
pub const REG_ATTACK: u16 = 0x60;
pub const REG_SUSTAIN: u16 = 0x80;
pub const REG_FREQUENCY: u16 = 0xA0;
pub const REG_NOTE: u16 = 0xB0;
pub const REG_FEEDCONN: u16 = 0xC0;
pub const REG_WAVE: u16 = 0xE0;

/// Set-instrument opcode.
pub const CMD_SET_INSTRUMENT: u8 = 0xD0;
/// Play-instrument opcode: set-instrument plus an inline frequency/note pair.
pub const CMD_PLAY_INSTRUMENT: u8 = 0xD1;
/// First of nine per-channel note-on opcodes (0xD7-0xDF).
pub const CMD_NOTE_ON: u8 = 0xD7;

pub const NUM_OPERATORS: usize = 36;

/// Register offset of each of the 36 operators. Each bank's 18 operators sit
/// in three sextets with a two-slot gap after each one.
pub const OPERATOR_OFFSETS: [u16; NUM_OPERATORS] = [
    0x000, 0x001, 0x002, 0x003, 0x004, 0x005, 0x008, 0x009, 0x00A, 0x00B, 0x00C, 0x00D, 0x010,
    0x011, 0x012, 0x013, 0x014, 0x015, 0x100, 0x101, 0x102, 0x103, 0x104, 0x105, 0x108, 0x109,
    0x10A, 0x10B, 0x10C, 0x10D, 0x110, 0x111, 0x112, 0x113, 0x114, 0x115,
];

/// Index into [`OPERATOR_OFFSETS`] of each channel's modulator; the carrier
/// offset is the modulator offset plus 3.
pub const CHANNEL_TO_OP: [usize; NUM_CHANNELS] = [
    0, 1, 2, 6, 7, 8, 12, 13, 14, 18, 19, 20, 24, 25, 26, 30, 31, 32,
];

/// Offset of each channel within the per-channel register families
/// (0xA0/0xB0/0xC0), bank bit included.
pub const CHANNEL_TO_OFFSET: [u16; NUM_CHANNELS] = [
    0x000, 0x001, 0x002, 0x003, 0x004, 0x005, 0x006, 0x007, 0x008, 0x100, 0x101, 0x102, 0x103,
    0x104, 0x105, 0x106, 0x107, 0x108,
];

/// Which of a channel's two FM generators a register addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorRole {
    Modulator,
    Carrier,
}

bitflags! {
    /// Flags packed above the 5-bit channel number in an instrument opcode's
    /// channel byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelFlags: u8 {
        const MOD_LEVEL = 0b0010_0000;
        const CAR_LEVEL = 0b0100_0000;
        const FEEDCONN  = 0b1000_0000;
    }

    /// One bit per interned instrument slot carried by a set/play opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotFlags: u8 {
        const MOD_CHARACTER = 0b0000_0001;
        const MOD_ATTACK    = 0b0000_0010;
        const MOD_SUSTAIN   = 0b0000_0100;
        const MOD_WAVE      = 0b0000_1000;
        const CAR_CHARACTER = 0b0001_0000;
        const CAR_ATTACK    = 0b0010_0000;
        const CAR_SUSTAIN   = 0b0100_0000;
        const CAR_WAVE      = 0b1000_0000;
    }

    /// The two spare bits of a note-on opcode's note byte, used to flag
    /// inline operator volumes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NoteFlags: u8 {
        const MOD_LEVEL = 0b0100_0000;
        const CAR_LEVEL = 0b1000_0000;
    }
}

/// Low five bits of a channel byte; the rest are [`ChannelFlags`].
pub const CHANNEL_NUMBER_MASK: u8 = 0b0001_1111;
/// Value bits of a note-on opcode's note byte; the rest are [`NoteFlags`].
pub const NOTE_VALUE_MASK: u8 = 0b0011_1111;

/// Whether the base address of `addr` lies in the range OPB reserves for
/// synthetic opcodes.
pub fn is_special_command(addr: u16) -> bool {
    let base = addr & 0xFF;
    (0xD0..=0xDF).contains(&base)
}

fn register_offset_to_channel(offset: u16) -> Option<usize> {
    let base = offset & 0xFF;
    let chunk = (base / 8) as usize;
    let suboff = (base % 8) as usize;
    if chunk >= 3 || suboff >= 6 {
        return None;
    }
    let bank = if offset & 0x100 != 0 { NUM_CHANNELS / 2 } else { 0 };
    Some(chunk * 3 + (suboff % 3) + bank)
}

fn register_offset_to_role(offset: u16) -> Option<OperatorRole> {
    let suboff = (offset & 0xFF) % 8;
    if suboff >= 6 {
        return None;
    }
    if suboff >= 3 {
        Some(OperatorRole::Carrier)
    } else {
        Some(OperatorRole::Modulator)
    }
}

/// Channel a register write belongs to, or `None` for registers outside every
/// channel's range (timers, percussion mode, the test register).
pub fn channel_from_register(reg: u16) -> Option<usize> {
    let base = reg & 0xFF;
    if (0x20..=0x95).contains(&base) || (0xE0..=0xF5).contains(&base) {
        let mut offset = base % 0x20;
        if offset >= 0x16 {
            return None;
        }
        if reg & 0x100 != 0 {
            offset |= 0x100;
        }
        register_offset_to_channel(offset)
    } else if (0xA0..=0xB8).contains(&base) || (0xC0..=0xC8).contains(&base) {
        let ch = (base % 0x10) as usize;
        if ch >= 9 {
            return None;
        }
        Some(ch + if reg & 0x100 != 0 { 9 } else { 0 })
    } else {
        None
    }
}

/// Operator a register write addresses, or `None` for per-channel and global
/// registers.
pub fn operator_from_register(reg: u16) -> Option<OperatorRole> {
    let base = reg & 0xFF;
    if (0x20..=0x95).contains(&base) || (0xE0..=0xF5).contains(&base) {
        let offset = base % 0x20;
        if offset >= 0x16 {
            return None;
        }
        register_offset_to_role(offset)
    } else {
        None
    }
}

/// Whether `addr` is the note register (0xB0-0xB8 family) of `channel`.
pub fn is_channel_note_event(addr: u16, channel: usize) -> bool {
    addr == REG_NOTE + (channel % 9) as u16 + if channel >= 9 { 0x100 } else { 0 }
}
