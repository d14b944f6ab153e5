//! OPL-to-OPB conversion. The linear register-write stream is split per
//! channel, each channel is scanned for ranges of writes that belong to one
//! musical event, ranges are collapsed into synthetic opcodes where that is
//! cheaper than the primitive writes, and the processed stream is packed into
//! timestamped chunks behind the instrument table.

use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::WriteBytesExt;

use crate::binutils::{encode_uint7, uint7_size, write_uint7, OPB_HEADER_SIZE, OPB_MAGIC};
use crate::dtype::{
    seek_err, tell_err, write_err, OpbError, OpbFormat, OplCommand, ReadWrite, NUM_TRACKS,
};
use crate::fileutils::open_file_overwrite_rw;
use crate::instrument::{InstrumentTable, PartialInstrument};
use crate::opl::{
    is_channel_note_event, is_special_command, operator_from_register, ChannelFlags, NoteFlags,
    OperatorRole, SlotFlags, CMD_NOTE_ON, CMD_PLAY_INSTRUMENT, CMD_SET_INSTRUMENT,
    NOTE_VALUE_MASK,
};

/// An [`OplCommand`] carried through the conversion pipeline.
///
/// `order_index` is the command's position in the accepted input stream and
/// is the global sort key that restores stream order after the per-channel
/// passes. A nonzero `data_index` marks a synthetic opcode and points (one
/// based) at its argument bytes in the data pool.
#[derive(Debug, Clone, Copy)]
struct Command {
    addr: u16,
    data: u8,
    time: f64,
    order_index: usize,
    data_index: usize,
}

/// Argument bytes of one synthetic opcode, at most 16 of them.
#[derive(Debug, Clone, Copy, Default)]
struct OpbData {
    count: usize,
    args: [u8; 16],
}

impl OpbData {
    fn push_u8(&mut self, value: u8) {
        self.args[self.count] = value;
        self.count += 1;
    }

    fn push_uint7(&mut self, value: u32) {
        let mut buf = [0u8; 4];
        let count = encode_uint7(value, &mut buf);
        self.args[self.count..self.count + count].copy_from_slice(&buf[..count]);
        self.count += count;
    }

    fn bytes(&self) -> &[u8] {
        &self.args[..self.count]
    }
}

struct WriteContext<'a, W: Write + Seek> {
    writer: &'a mut W,
    format: OpbFormat,
    command_stream: Vec<Command>,
    instruments: InstrumentTable,
    data_map: Vec<OpbData>,
    tracks: [Vec<Command>; NUM_TRACKS],
}

/// Convert an OPL command stream to OPB and write it to `writer`.
///
/// Input commands whose base address falls in the synthetic opcode range
/// (0xD0-0xDF) would be indistinguishable from opcodes on the wire; they are
/// dropped with a warning. Timestamps must be nondecreasing.
pub fn opl_to_binary<W: Write + Seek>(
    format: OpbFormat,
    commands: &[OplCommand],
    writer: &mut W,
) -> Result<(), OpbError> {
    let mut context = WriteContext {
        writer,
        format,
        command_stream: Vec::with_capacity(commands.len()),
        instruments: InstrumentTable::new(),
        data_map: Vec::new(),
        tracks: std::array::from_fn(|_| Vec::new()),
    };

    let mut order_index = 0;
    for source in commands {
        if is_special_command(source.addr) {
            log::warn!(
                "Illegal register 0x{:03X} with value 0x{:02X} in command stream, ignored",
                source.addr,
                source.data
            );
        } else {
            context.command_stream.push(Command {
                addr: source.addr,
                data: source.data,
                time: source.time,
                order_index,
                data_index: 0,
            });
            order_index += 1;
        }
    }

    let result = context.convert();
    if let Err(ref err) = result {
        log::error!("{err}");
    }
    result
}

/// Convert an OPL command stream to an OPB file on disk.
pub fn opl_to_file<P: AsRef<Path>>(
    format: OpbFormat,
    commands: &[OplCommand],
    path: P,
) -> Result<(), OpbError> {
    let mut file = open_file_overwrite_rw(&path).map_err(|err| {
        log::error!(
            "Couldn't open file '{}' for writing: {err}",
            path.as_ref().display()
        );
        OpbError::Logged
    })?;
    opl_to_binary(format, commands, &mut file)
}

impl<'a, W: Write + Seek> WriteContext<'a, W> {
    fn convert(&mut self) -> Result<(), OpbError> {
        self.writer.write_all(&OPB_MAGIC).map_err(write_err)?;

        log::debug!("OPB format {} ({})", self.format.as_byte(), self.format);
        self.writer
            .write_u8(self.format.as_byte())
            .map_err(write_err)?;

        if self.format == OpbFormat::Raw {
            return self.write_raw();
        }

        log::debug!("Separating OPL data stream into channels");
        self.separate_tracks();

        let mut outputs: Vec<Vec<Command>> = Vec::with_capacity(NUM_TRACKS);
        for channel in 0..NUM_TRACKS {
            log::debug!("Processing channel {channel}");
            let mut out = Vec::new();
            self.process_track(channel, &mut out)?;
            outputs.push(out);
        }

        // restore a single stream in received order
        log::debug!("Combining processed data into linear stream");
        self.command_stream.clear();
        for out in outputs {
            self.command_stream.extend(out);
        }
        self.command_stream.sort_by_key(|cmd| cmd.order_index);

        // the three size fields are backpatched once the chunks are out
        self.writer
            .seek(SeekFrom::Current(12))
            .map_err(seek_err)?;

        log::debug!("Writing instrument table");
        for instr in self.instruments.entries() {
            instr.write_to_file(&mut *self.writer)?;
        }

        log::debug!("Writing chunks");
        let stream = std::mem::take(&mut self.command_stream);
        let mut chunks = 0u32;
        let mut last_time = 0.0;
        let mut i = 0;
        while i < stream.len() {
            let chunk_time = stream[i].time;
            let start = i;
            while i < stream.len() && stream[i].time <= chunk_time {
                i += 1;
            }
            self.write_chunk(chunk_time - last_time, &stream[start..i])?;
            chunks += 1;
            last_time = chunk_time;
        }

        log::debug!("Writing header");
        let fpos = self.writer.stream_position().map_err(tell_err)?;
        self.writer
            .seek(SeekFrom::Start(OPB_HEADER_SIZE + 1))
            .map_err(seek_err)?;
        self.writer
            .write_u32::<byteorder::BigEndian>(fpos as u32)
            .map_err(write_err)?;
        self.writer
            .write_u32::<byteorder::BigEndian>(self.instruments.len() as u32)
            .map_err(write_err)?;
        self.writer
            .write_u32::<byteorder::BigEndian>(chunks)
            .map_err(write_err)?;

        Ok(())
    }

    /// Five bytes per command, no table, no grouping.
    fn write_raw(&mut self) -> Result<(), OpbError> {
        log::debug!("Writing raw OPL data stream");

        let mut last_time = 0.0;
        for cmd in &self.command_stream {
            let elapsed_ms = ((cmd.time - last_time) * 1000.0 + 0.5) as u16;
            self.writer
                .write_u16::<byteorder::BigEndian>(elapsed_ms)
                .map_err(write_err)?;
            self.writer
                .write_u16::<byteorder::BigEndian>(cmd.addr)
                .map_err(write_err)?;
            self.writer.write_u8(cmd.data).map_err(write_err)?;
            last_time = cmd.time;
        }
        Ok(())
    }

    fn separate_tracks(&mut self) {
        for cmd in &self.command_stream {
            let channel = crate::opl::channel_from_register(cmd.addr).unwrap_or(NUM_TRACKS - 1);
            self.tracks[channel].push(*cmd);
        }
    }

    /// Walk one channel's bucket and process it range by range. A range is a
    /// run of commands sharing the range's start time that were adjacent in
    /// the input stream; a note write for this channel closes the range it
    /// appears in.
    fn process_track(&mut self, channel: usize, out: &mut Vec<Command>) -> Result<(), OpbError> {
        let commands = std::mem::take(&mut self.tracks[channel]);
        if commands.is_empty() {
            return Ok(());
        }

        let mut last_order = commands[0].order_index;
        let mut i = 0;
        while i < commands.len() {
            let time = commands[i].time;
            let start = i;

            while i < commands.len()
                && commands[i].time <= time
                && commands[i].order_index - last_order <= 1
            {
                let cmd = commands[i];
                last_order = cmd.order_index;
                i += 1;
                if is_channel_note_event(cmd.addr, channel) {
                    break;
                }
            }
            let end = i;

            self.process_range(channel, time, &commands[start..end], out, start, end)?;

            if i < commands.len() {
                last_order = commands[i].order_index;
            }
        }
        Ok(())
    }

    /// Collapse one range into opcodes plus reordered primitive writes.
    fn process_range(
        &mut self,
        channel: usize,
        time: f64,
        commands: &[Command],
        range: &mut Vec<Command>,
        debug_start: usize,
        debug_end: usize,
    ) -> Result<(), OpbError> {
        for cmd in commands {
            if cmd.time != time {
                log::error!(
                    "A timing error occurred at {} ms on channel {channel} in range {debug_start}-{debug_end}",
                    (time * 1000.0) as i64
                );
                return Err(OpbError::Logged);
            }
        }

        let mut mod_char: Option<Command> = None;
        let mut mod_level: Option<Command> = None;
        let mut mod_attack: Option<Command> = None;
        let mut mod_sustain: Option<Command> = None;
        let mut mod_wave: Option<Command> = None;
        let mut car_char: Option<Command> = None;
        let mut car_level: Option<Command> = None;
        let mut car_attack: Option<Command> = None;
        let mut car_sustain: Option<Command> = None;
        let mut car_wave: Option<Command> = None;
        let mut freq: Option<Command> = None;
        let mut note: Option<Command> = None;
        let mut feedconn: Option<Command> = None;

        let fill = |slot: &mut Option<Command>, cmd: &Command| -> Result<(), OpbError> {
            if slot.is_some() {
                log::error!(
                    "A decoding error occurred at {} ms on channel {channel} in range {debug_start}-{debug_end}",
                    (time * 1000.0) as i64
                );
                return Err(OpbError::Logged);
            }
            *slot = Some(*cmd);
            Ok(())
        };

        for cmd in commands {
            let base = cmd.addr & 0xFF;

            if let Some(role) = operator_from_register(cmd.addr) {
                let slot = match (role, base) {
                    (OperatorRole::Modulator, 0x20..=0x35) => &mut mod_char,
                    (OperatorRole::Modulator, 0x40..=0x55) => &mut mod_level,
                    (OperatorRole::Modulator, 0x60..=0x75) => &mut mod_attack,
                    (OperatorRole::Modulator, 0x80..=0x95) => &mut mod_sustain,
                    (OperatorRole::Modulator, _) => &mut mod_wave,
                    (OperatorRole::Carrier, 0x20..=0x35) => &mut car_char,
                    (OperatorRole::Carrier, 0x40..=0x55) => &mut car_level,
                    (OperatorRole::Carrier, 0x60..=0x75) => &mut car_attack,
                    (OperatorRole::Carrier, 0x80..=0x95) => &mut car_sustain,
                    (OperatorRole::Carrier, _) => &mut car_wave,
                };
                fill(slot, cmd)?;
            } else {
                match base {
                    0xA0..=0xA8 => fill(&mut freq, cmd)?,
                    0xB0..=0xB8 => fill(&mut note, cmd)?,
                    0xC0..=0xC8 => fill(&mut feedconn, cmd)?,
                    _ => range.push(*cmd),
                }
            }
        }

        // combine instrument data
        let partial = PartialInstrument {
            feedconn: feedconn.map(|c| c.data),
            mod_characteristic: mod_char.map(|c| c.data),
            mod_attack_decay: mod_attack.map(|c| c.data),
            mod_sustain_release: mod_sustain.map(|c| c.data),
            mod_wave_select: mod_wave.map(|c| c.data),
            car_characteristic: car_char.map(|c| c.data),
            car_attack_decay: car_attack.map(|c| c.data),
            car_sustain_release: car_sustain.map(|c| c.data),
            car_wave_select: car_wave.map(|c| c.data),
        };

        if partial.slot_count() > 0 {
            let index = self.instruments.intern(&partial);

            let mut size = uint7_size(index as u32) + 3;
            let mut instr_changes = partial.slot_count();

            if mod_level.is_some() {
                size += 1;
                instr_changes += 1;
            }
            if car_level.is_some() {
                size += 1;
                instr_changes += 1;
            }

            // combine with the frequency/note pair if both are present
            let play = freq.is_some() && note.is_some();
            if play {
                size += 2;
                instr_changes += 2;
            }

            if size < instr_changes * 2 {
                let mut data = OpbData::default();
                data.push_uint7(index as u32);

                let mut channel_flags = ChannelFlags::empty();
                channel_flags.set(ChannelFlags::MOD_LEVEL, mod_level.is_some());
                channel_flags.set(ChannelFlags::CAR_LEVEL, car_level.is_some());
                channel_flags.set(ChannelFlags::FEEDCONN, feedconn.is_some());
                data.push_u8(channel as u8 | channel_flags.bits());

                let mut slots = SlotFlags::empty();
                slots.set(SlotFlags::MOD_CHARACTER, mod_char.is_some());
                slots.set(SlotFlags::MOD_ATTACK, mod_attack.is_some());
                slots.set(SlotFlags::MOD_SUSTAIN, mod_sustain.is_some());
                slots.set(SlotFlags::MOD_WAVE, mod_wave.is_some());
                slots.set(SlotFlags::CAR_CHARACTER, car_char.is_some());
                slots.set(SlotFlags::CAR_ATTACK, car_attack.is_some());
                slots.set(SlotFlags::CAR_SUSTAIN, car_sustain.is_some());
                slots.set(SlotFlags::CAR_WAVE, car_wave.is_some());
                data.push_u8(slots.bits());

                let mut reg = u16::from(CMD_SET_INSTRUMENT);
                if play {
                    if let (Some(f), Some(n)) = (freq, note) {
                        data.push_u8(f.data);
                        data.push_u8(n.data);
                    }
                    reg = u16::from(CMD_PLAY_INSTRUMENT);
                }

                if let Some(level) = mod_level {
                    data.push_u8(level.data);
                }
                if let Some(level) = car_level {
                    data.push_u8(level.data);
                }

                let data_index = self.data_map.len() + 1;
                self.data_map.push(data);

                range.push(Command {
                    addr: reg + if channel >= 9 { 0x100 } else { 0 },
                    data: 0,
                    time,
                    order_index: commands[0].order_index,
                    data_index,
                });

                feedconn = None;
                mod_char = None;
                mod_level = None;
                mod_attack = None;
                mod_sustain = None;
                mod_wave = None;
                car_char = None;
                car_level = None;
                car_attack = None;
                car_sustain = None;
                car_wave = None;
                if play {
                    freq = None;
                    note = None;
                }
            }
        }

        // combine a leftover frequency/note pair with any operator levels
        if let (Some(f), Some(n)) = (freq, note) {
            let reg =
                u16::from(CMD_NOTE_ON) + (channel % 9) as u16 + if channel >= 9 { 0x100 } else { 0 };

            let mut data = OpbData::default();
            data.push_u8(f.data);

            let mut note_flags = NoteFlags::empty();
            note_flags.set(NoteFlags::MOD_LEVEL, mod_level.is_some());
            note_flags.set(NoteFlags::CAR_LEVEL, car_level.is_some());
            data.push_u8((n.data & NOTE_VALUE_MASK) | note_flags.bits());

            if let Some(level) = mod_level {
                data.push_u8(level.data);
            }
            if let Some(level) = car_level {
                data.push_u8(level.data);
            }

            let data_index = self.data_map.len() + 1;
            self.data_map.push(data);

            range.push(Command {
                addr: reg,
                data: 0,
                time,
                order_index: n.order_index,
                data_index,
            });

            freq = None;
            note = None;
            mod_level = None;
            car_level = None;
        }

        for slot in [
            mod_char,
            mod_level,
            mod_attack,
            mod_sustain,
            mod_wave,
            car_char,
            car_level,
            car_attack,
            car_sustain,
            car_wave,
            feedconn,
            freq,
            note,
        ]
        .into_iter()
        .flatten()
        {
            range.push(slot);
        }

        Ok(())
    }

    /// Emit one chunk: a varint header and the low-bank writes followed by
    /// the high-bank writes, both in processed order.
    fn write_chunk(&mut self, elapsed: f64, commands: &[Command]) -> Result<(), OpbError> {
        let elapsed_ms = (elapsed * 1000.0 + 0.5) as u32;
        let lo_count = commands.iter().filter(|cmd| cmd.addr & 0x100 == 0).count();
        let hi_count = commands.len() - lo_count;

        write_uint7(&mut *self.writer, elapsed_ms)?;
        write_uint7(&mut *self.writer, lo_count as u32)?;
        write_uint7(&mut *self.writer, hi_count as u32)?;

        for is_low in [true, false] {
            for cmd in commands {
                if (cmd.addr & 0x100 == 0) != is_low {
                    continue;
                }

                let base_addr = (cmd.addr & 0xFF) as u8;
                self.writer.write_u8(base_addr).map_err(write_err)?;

                if cmd.data_index != 0 {
                    if !is_special_command(cmd.addr) {
                        log::error!(
                            "Unexpected write error. Command had a data index but was not an OPB command"
                        );
                        return Err(OpbError::Logged);
                    }
                    let data = self.data_map.get(cmd.data_index - 1).ok_or_else(|| {
                        log::error!("Data pool index {} out of range", cmd.data_index);
                        OpbError::Logged
                    })?;
                    self.writer.write_all(data.bytes()).map_err(write_err)?;
                } else {
                    if is_special_command(cmd.addr) {
                        log::error!(
                            "Unexpected write error. Command was an OPB command but had no data index"
                        );
                        return Err(OpbError::Logged);
                    }
                    self.writer.write_u8(cmd.data).map_err(write_err)?;
                }
            }
        }

        Ok(())
    }
}
