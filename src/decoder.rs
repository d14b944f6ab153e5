//! Streaming OPB reader. An [`OpbFile`] parses the container header eagerly,
//! loads the instrument table on first read, and then expands chunks and
//! synthetic opcodes back into primitive register writes on demand, without
//! materialising the whole command stream.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use crate::binutils::{
    read_u8, read_uint7, OPB_DATA_START, OPB_HEADER_SIZE, OPB_INSTRUMENT_SIZE, OPB_MAGIC,
};
use crate::dtype::{
    read_err, seek_err, tell_err, OpbError, OpbFormat, OplCommand, ReadOnlySource, ReadWrite,
    NUM_CHANNELS,
};
use crate::instrument::Instrument;
use crate::opl::{
    ChannelFlags, NoteFlags, SlotFlags, CHANNEL_NUMBER_MASK, CHANNEL_TO_OFFSET, CHANNEL_TO_OP,
    CMD_NOTE_ON, CMD_PLAY_INSTRUMENT, CMD_SET_INSTRUMENT, NOTE_VALUE_MASK, OPERATOR_OFFSETS,
    REG_ATTACK, REG_CHARACTER, REG_FEEDCONN, REG_FREQUENCY, REG_LEVELS, REG_NOTE, REG_SUSTAIN,
    REG_WAVE,
};

/// Counts parsed from an OPB container header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderInfo {
    pub format: OpbFormat,
    pub size_bytes: usize,
    pub instrument_count: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChunkCursor {
    lo_count: usize,
    count: usize,
    index: usize,
}

/// A pull-style reader over an OPB stream.
#[derive(Debug)]
pub struct OpbFile<R: Read + Seek> {
    source: R,
    seekable: bool,
    format: OpbFormat,
    size_bytes: usize,
    instrument_count: usize,
    chunk_count: usize,
    chunk_data_offset: u64,
    instruments: Vec<Instrument>,
    instruments_initialized: bool,
    time: f64,
    chunk_index: usize,
    current_chunk: ChunkCursor,
    // synthetic opcodes expand to several register writes in one go
    command_buffer: Vec<OplCommand>,
    buffer_index: usize,
    sticky_error: Option<OpbError>,
}

impl<R: Read + Seek> OpbFile<R> {
    /// Open an OPB stream for reading. The header is parsed immediately; the
    /// instrument table is fetched on the first read.
    pub fn open(source: R) -> Result<OpbFile<R>, OpbError> {
        OpbFile::from_source(source, true)
    }

    fn from_source(mut source: R, seekable: bool) -> Result<OpbFile<R>, OpbError> {
        let mut id = [0u8; 7];
        source.read_exact(&mut id).map_err(read_err)?;

        if id[..5] != OPB_MAGIC[..5] {
            return Err(OpbError::NotAnOpbFile);
        }
        if id[5] != OPB_MAGIC[5] {
            return Err(OpbError::VersionUnsupported);
        }
        if id[6] != 0 {
            return Err(OpbError::NotAnOpbFile);
        }

        let format_byte = read_u8(&mut source)?;
        let Some(format) = OpbFormat::from_byte(format_byte) else {
            log::error!("Error reading OPB file: unknown format {format_byte}");
            return Err(OpbError::Logged);
        };

        let mut opb = OpbFile {
            source,
            seekable,
            format,
            size_bytes: 0,
            instrument_count: 0,
            chunk_count: 0,
            chunk_data_offset: OPB_HEADER_SIZE + 1,
            instruments: Vec::new(),
            instruments_initialized: false,
            time: 0.0,
            chunk_index: 0,
            current_chunk: ChunkCursor::default(),
            command_buffer: Vec::with_capacity(16),
            buffer_index: 0,
            sticky_error: None,
        };

        if format == OpbFormat::Default {
            opb.size_bytes = opb.source.read_u32::<BigEndian>().map_err(read_err)? as usize;
            opb.instrument_count = opb.source.read_u32::<BigEndian>().map_err(read_err)? as usize;
            opb.chunk_count = opb.source.read_u32::<BigEndian>().map_err(read_err)? as usize;
            opb.chunk_data_offset =
                OPB_DATA_START + opb.instrument_count as u64 * OPB_INSTRUMENT_SIZE;
        }

        Ok(opb)
    }

    pub fn header_info(&self) -> HeaderInfo {
        HeaderInfo {
            format: self.format,
            size_bytes: self.size_bytes,
            instrument_count: self.instrument_count,
            chunk_count: self.chunk_count,
        }
    }

    /// The instrument table, empty until the first read.
    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    /// Read up to `buffer.len()` primitive commands. `Ok(0)` means the end of
    /// the command stream. A failed read poisons the session: every later
    /// call reports the same error until [`OpbFile::reset`].
    pub fn read_buffer(&mut self, buffer: &mut [OplCommand]) -> Result<usize, OpbError> {
        if let Some(err) = &self.sticky_error {
            return Err(err.clone());
        }
        match self.read_commands(buffer) {
            Ok(count) => Ok(count),
            Err(err) => {
                self.sticky_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Read the remainder of the command stream into one vector.
    pub fn read_to_end(&mut self) -> Result<Vec<OplCommand>, OpbError> {
        let mut result = Vec::new();
        let mut buffer = [OplCommand::default(); 32];
        loop {
            let count = self.read_buffer(&mut buffer)?;
            if count == 0 {
                return Ok(result);
            }
            result.extend_from_slice(&buffer[..count]);
        }
    }

    /// Rewind to the start of the command stream. Clears any sticky error.
    /// The instrument table stays loaded.
    pub fn reset(&mut self) -> Result<(), OpbError> {
        self.command_buffer.clear();
        self.buffer_index = 0;
        self.chunk_index = 0;
        self.time = 0.0;
        self.current_chunk = ChunkCursor::default();
        self.sticky_error = None;
        self.source
            .seek(SeekFrom::Start(self.chunk_data_offset))
            .map_err(seek_err)?;
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    fn read_commands(&mut self, buffer: &mut [OplCommand]) -> Result<usize, OpbError> {
        if !self.instruments_initialized {
            self.instruments_initialized = true;
            if self.format != OpbFormat::Raw {
                self.load_instruments()?;
            }
        }

        let mut index = 0;

        if self.format == OpbFormat::Raw {
            while index < buffer.len() {
                let Some((elapsed, addr, data)) = self.read_raw_entry()? else {
                    break;
                };
                self.time += f64::from(elapsed) / 1000.0;
                buffer[index] = OplCommand::new(addr, data, self.time);
                index += 1;
            }
        } else {
            while index < buffer.len() {
                if self.buffer_index < self.command_buffer.len() {
                    buffer[index] = self.command_buffer[self.buffer_index];
                    self.buffer_index += 1;
                    index += 1;
                } else if self.current_chunk.index >= self.current_chunk.count {
                    if !self.read_chunk()? {
                        break;
                    }
                } else {
                    self.read_command()?;
                }
            }
        }

        Ok(index)
    }

    /// Fetch the instrument table from offset 20, putting the stream back
    /// where it was. An unseekable source must still be positioned at the
    /// table, which holds right after header parse.
    fn load_instruments(&mut self) -> Result<(), OpbError> {
        if self.seekable {
            let offset = self.source.stream_position().map_err(tell_err)?;
            self.source
                .seek(SeekFrom::Start(OPB_DATA_START))
                .map_err(seek_err)?;
            self.read_instrument_entries()?;
            let restore = offset.max(self.chunk_data_offset);
            self.source
                .seek(SeekFrom::Start(restore))
                .map_err(seek_err)?;
        } else {
            self.read_instrument_entries()?;
        }
        Ok(())
    }

    fn read_instrument_entries(&mut self) -> Result<(), OpbError> {
        self.instruments = Vec::with_capacity(self.instrument_count);
        for index in 0..self.instrument_count {
            let mut instr = Instrument::default();
            instr.read_from_file(&mut self.source)?;
            instr.index = index;
            self.instruments.push(instr);
        }
        Ok(())
    }

    /// Advance to the next chunk header. `Ok(false)` when the chunk count is
    /// exhausted.
    fn read_chunk(&mut self) -> Result<bool, OpbError> {
        if self.chunk_index >= self.chunk_count {
            return Ok(false);
        }

        let elapsed = read_uint7(&mut self.source)?;
        let lo_count = read_uint7(&mut self.source)? as usize;
        let hi_count = read_uint7(&mut self.source)? as usize;

        self.current_chunk = ChunkCursor {
            lo_count,
            count: lo_count + hi_count,
            index: 0,
        };
        self.chunk_index += 1;
        self.time += f64::from(elapsed) / 1000.0;

        Ok(true)
    }

    /// Read the next on-wire command of the current chunk and expand it into
    /// the command buffer.
    fn read_command(&mut self) -> Result<(), OpbError> {
        let mask: u16 = if self.current_chunk.index >= self.current_chunk.lo_count {
            0x100
        } else {
            0
        };
        self.current_chunk.index += 1;
        self.command_buffer.clear();
        self.buffer_index = 0;

        let base_addr = read_u8(&mut self.source)?;
        let addr = u16::from(base_addr) | mask;
        let time = self.time;

        match base_addr {
            CMD_SET_INSTRUMENT | CMD_PLAY_INSTRUMENT => {
                let instr_index = read_uint7(&mut self.source)? as usize;

                let mut mask_bytes = [0u8; 2];
                self.source.read_exact(&mut mask_bytes).map_err(read_err)?;

                let channel_flags = ChannelFlags::from_bits_truncate(mask_bytes[0]);
                let channel = (mask_bytes[0] & CHANNEL_NUMBER_MASK) as usize;
                if channel >= NUM_CHANNELS {
                    log::error!("Error reading OPB command: channel {channel} out of range");
                    return Err(OpbError::Logged);
                }

                let slots = SlotFlags::from_bits_truncate(mask_bytes[1]);

                let is_play = base_addr == CMD_PLAY_INSTRUMENT;
                let mut freq = 0u8;
                let mut note = 0u8;
                if is_play {
                    freq = read_u8(&mut self.source)?;
                    note = read_u8(&mut self.source)?;
                }

                let mut mod_level = 0u8;
                let mut car_level = 0u8;
                if channel_flags.contains(ChannelFlags::MOD_LEVEL) {
                    mod_level = read_u8(&mut self.source)?;
                }
                if channel_flags.contains(ChannelFlags::CAR_LEVEL) {
                    car_level = read_u8(&mut self.source)?;
                }

                let Some(instr) = self.instruments.get(instr_index).copied() else {
                    log::error!("Error reading OPB command: instrument {instr_index} out of range");
                    return Err(OpbError::Logged);
                };

                let conn = CHANNEL_TO_OFFSET[channel];
                let modulator = OPERATOR_OFFSETS[CHANNEL_TO_OP[channel]];
                let carrier = modulator + 3;

                let buffer = &mut self.command_buffer;
                let mut push = |reg: u16, data: u8| buffer.push(OplCommand::new(reg, data, time));

                if channel_flags.contains(ChannelFlags::FEEDCONN) {
                    push(REG_FEEDCONN + conn, instr.feedconn as u8);
                }
                if slots.contains(SlotFlags::MOD_CHARACTER) {
                    push(REG_CHARACTER + modulator, instr.modulator.characteristic as u8);
                }
                if channel_flags.contains(ChannelFlags::MOD_LEVEL) {
                    push(REG_LEVELS + modulator, mod_level);
                }
                if slots.contains(SlotFlags::MOD_ATTACK) {
                    push(REG_ATTACK + modulator, instr.modulator.attack_decay as u8);
                }
                if slots.contains(SlotFlags::MOD_SUSTAIN) {
                    push(REG_SUSTAIN + modulator, instr.modulator.sustain_release as u8);
                }
                if slots.contains(SlotFlags::MOD_WAVE) {
                    push(REG_WAVE + modulator, instr.modulator.wave_select as u8);
                }
                if slots.contains(SlotFlags::CAR_CHARACTER) {
                    push(REG_CHARACTER + carrier, instr.carrier.characteristic as u8);
                }
                if channel_flags.contains(ChannelFlags::CAR_LEVEL) {
                    push(REG_LEVELS + carrier, car_level);
                }
                if slots.contains(SlotFlags::CAR_ATTACK) {
                    push(REG_ATTACK + carrier, instr.carrier.attack_decay as u8);
                }
                if slots.contains(SlotFlags::CAR_SUSTAIN) {
                    push(REG_SUSTAIN + carrier, instr.carrier.sustain_release as u8);
                }
                if slots.contains(SlotFlags::CAR_WAVE) {
                    push(REG_WAVE + carrier, instr.carrier.wave_select as u8);
                }
                if is_play {
                    push(REG_FREQUENCY + conn, freq);
                    push(REG_NOTE + conn, note);
                }
            }

            CMD_NOTE_ON..=0xDF => {
                let channel = (base_addr - CMD_NOTE_ON) as usize + if mask != 0 { 9 } else { 0 };
                if channel >= NUM_CHANNELS {
                    log::error!("Error reading OPB command: channel {channel} out of range");
                    return Err(OpbError::Logged);
                }

                let mut freq_note = [0u8; 2];
                self.source.read_exact(&mut freq_note).map_err(read_err)?;
                let freq = freq_note[0];
                let note = freq_note[1];

                let offset = CHANNEL_TO_OFFSET[channel];
                self.command_buffer
                    .push(OplCommand::new(REG_FREQUENCY + offset, freq, time));
                self.command_buffer.push(OplCommand::new(
                    REG_NOTE + offset,
                    note & NOTE_VALUE_MASK,
                    time,
                ));

                let flags = NoteFlags::from_bits_truncate(note);
                if flags.contains(NoteFlags::MOD_LEVEL) {
                    let volume = read_u8(&mut self.source)?;
                    let reg = REG_LEVELS + OPERATOR_OFFSETS[CHANNEL_TO_OP[channel]];
                    self.command_buffer.push(OplCommand::new(reg, volume, time));
                }
                if flags.contains(NoteFlags::CAR_LEVEL) {
                    let volume = read_u8(&mut self.source)?;
                    let reg = REG_LEVELS + 3 + OPERATOR_OFFSETS[CHANNEL_TO_OP[channel]];
                    self.command_buffer.push(OplCommand::new(reg, volume, time));
                }
            }

            _ => {
                let data = read_u8(&mut self.source)?;
                self.command_buffer.push(OplCommand::new(addr, data, time));
            }
        }

        Ok(())
    }

    /// One fixed-size raw entry, or `None` at end of stream. A truncated
    /// trailing entry also ends the stream.
    fn read_raw_entry(&mut self) -> Result<Option<(u16, u16, u8)>, OpbError> {
        let mut buf = [0u8; 5];
        match self.source.read_exact(&mut buf) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(read_err(err)),
        }

        let elapsed = u16::from_be_bytes([buf[0], buf[1]]);
        let addr = u16::from_be_bytes([buf[2], buf[3]]);
        Ok(Some((elapsed, addr, buf[4])))
    }
}

impl OpbFile<BufReader<File>> {
    /// Open an OPB file on disk for reading.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<OpbFile<BufReader<File>>, OpbError> {
        let file = File::open(&path).map_err(|err| {
            log::error!(
                "Couldn't open file '{}' for reading: {err}",
                path.as_ref().display()
            );
            OpbError::Logged
        })?;
        OpbFile::open(BufReader::new(file))
    }
}

/// Decode an OPB stream from a forward-only source, delivering the commands
/// to `receiver` in batches. The instrument table is read inline, so the
/// source never needs to seek. A receiver failure stops decoding with
/// [`OpbError::Buffer`].
pub fn binary_to_opl<R, F>(reader: R, mut receiver: F) -> Result<(), OpbError>
where
    R: Read,
    F: FnMut(&[OplCommand]) -> Result<(), OpbError>,
{
    let mut opb = OpbFile::from_source(ReadOnlySource::new(reader), false)?;
    let mut buffer = [OplCommand::default(); 64];
    loop {
        let count = opb.read_buffer(&mut buffer)?;
        if count == 0 {
            return Ok(());
        }
        if receiver(&buffer[..count]).is_err() {
            return Err(OpbError::Buffer);
        }
    }
}

/// Decode an OPB file on disk, delivering the commands to `receiver` in
/// batches.
pub fn file_to_opl<P, F>(path: P, mut receiver: F) -> Result<(), OpbError>
where
    P: AsRef<Path>,
    F: FnMut(&[OplCommand]) -> Result<(), OpbError>,
{
    let mut opb = OpbFile::open_file(path)?;
    let mut buffer = [OplCommand::default(); 64];
    loop {
        let count = opb.read_buffer(&mut buffer)?;
        if count == 0 {
            return Ok(());
        }
        if receiver(&buffer[..count]).is_err() {
            return Err(OpbError::Buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::encoder::{opl_to_binary, opl_to_file};

    fn cmd(time: f64, addr: u16, data: u8) -> OplCommand {
        OplCommand { addr, data, time }
    }

    fn encode(format: OpbFormat, commands: &[OplCommand]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        opl_to_binary(format, commands, &mut cursor).unwrap();
        cursor.into_inner()
    }

    fn assert_streams_equal(actual: &[OplCommand], expected: &[OplCommand]) {
        let actual_regs: Vec<(u16, u8)> = actual.iter().map(|c| (c.addr, c.data)).collect();
        let expected_regs: Vec<(u16, u8)> = expected.iter().map(|c| (c.addr, c.data)).collect();
        assert_eq!(actual_regs, expected_regs);
        for (a, e) in actual.iter().zip(expected) {
            assert!(
                (a.time - e.time).abs() < 1e-9,
                "time mismatch: {} vs {}",
                a.time,
                e.time
            );
        }
    }

    /// Channel 0's full voice in the exact order a play opcode expands to,
    /// so the compressed round trip reproduces the input verbatim.
    fn canonical_song() -> Vec<OplCommand> {
        vec![
            // full voice and note-on for channel 0
            cmd(0.0, 0x0C0, 0x0E),
            cmd(0.0, 0x020, 0x21),
            cmd(0.0, 0x040, 0x18),
            cmd(0.0, 0x060, 0xF4),
            cmd(0.0, 0x080, 0x7F),
            cmd(0.0, 0x0E0, 0x01),
            cmd(0.0, 0x023, 0x61),
            cmd(0.0, 0x043, 0x3F),
            cmd(0.0, 0x063, 0xD2),
            cmd(0.0, 0x083, 0x36),
            cmd(0.0, 0x0E3, 0x02),
            cmd(0.0, 0x0A0, 0x44),
            cmd(0.0, 0x0B0, 0x31),
            // note-on for channel 9, level rewrite after the note
            cmd(0.5, 0x1A0, 0x44),
            cmd(0.5, 0x1B0, 0x21),
            cmd(0.5, 0x140, 0x2A),
            // writes outside any channel pass through the catch-all track
            cmd(1.0, 0x001, 0x20),
            cmd(1.0, 0x0BD, 0x20),
        ]
    }

    #[test]
    fn raw_round_trip_is_exact() {
        let song = vec![
            cmd(0.0, 0x020, 0x01),
            cmd(0.05, 0x040, 0x3F),
            cmd(0.05, 0x1B0, 0x21),
            cmd(1.0, 0x0BD, 0x20),
        ];
        let bytes = encode(OpbFormat::Raw, &song);

        let mut opb = OpbFile::open(Cursor::new(bytes)).unwrap();
        assert_eq!(opb.header_info().format, OpbFormat::Raw);
        let decoded = opb.read_to_end().unwrap();
        assert_streams_equal(&decoded, &song);
    }

    #[test]
    fn compressed_round_trip_preserves_a_canonical_stream() {
        let song = canonical_song();
        let bytes = encode(OpbFormat::Default, &song);

        let mut opb = OpbFile::open(Cursor::new(bytes)).unwrap();
        let decoded = opb.read_to_end().unwrap();
        assert_streams_equal(&decoded, &song);

        let info = opb.header_info();
        assert_eq!(info.format, OpbFormat::Default);
        assert_eq!(info.instrument_count, 1);
        assert_eq!(info.chunk_count, 3);
        assert_eq!(opb.instruments().len(), 1);
        assert_eq!(opb.instruments()[0].modulator.characteristic, 0x21);
    }

    #[test]
    fn set_instrument_expands_in_fixed_order() {
        let bytes = encode(
            OpbFormat::Default,
            &[
                cmd(0.0, 0x020, 0x21),
                cmd(0.0, 0x023, 0x61),
                cmd(0.0, 0x040, 0x18),
                cmd(0.0, 0x043, 0x3F),
                cmd(0.0, 0x060, 0xF4),
                cmd(0.0, 0x063, 0xD2),
                cmd(0.0, 0x080, 0x7F),
                cmd(0.0, 0x083, 0x36),
                cmd(0.0, 0x0E0, 0x01),
                cmd(0.0, 0x0E3, 0x02),
                cmd(0.0, 0x0C0, 0x0E),
            ],
        );

        let mut opb = OpbFile::open(Cursor::new(bytes)).unwrap();
        let decoded = opb.read_to_end().unwrap();

        let addrs: Vec<u16> = decoded.iter().map(|c| c.addr).collect();
        assert_eq!(
            addrs,
            [0x0C0, 0x020, 0x040, 0x060, 0x080, 0x0E0, 0x023, 0x043, 0x063, 0x083, 0x0E3]
        );
        assert!(decoded.iter().all(|c| c.time == 0.0));
    }

    #[test]
    fn small_buffers_drain_the_expansion_buffer() {
        let mut commands = vec![
            cmd(0.0, 0x020, 0x21),
            cmd(0.0, 0x023, 0x61),
            cmd(0.0, 0x040, 0x18),
            cmd(0.0, 0x043, 0x3F),
            cmd(0.0, 0x060, 0xF4),
            cmd(0.0, 0x063, 0xD2),
            cmd(0.0, 0x080, 0x7F),
            cmd(0.0, 0x083, 0x36),
            cmd(0.0, 0x0E0, 0x01),
            cmd(0.0, 0x0E3, 0x02),
            cmd(0.0, 0x0C0, 0x0E),
        ];
        commands.push(cmd(0.0, 0x0A0, 0x44));
        commands.push(cmd(0.0, 0x0B0, 0x31));
        let bytes = encode(OpbFormat::Default, &commands);

        let mut opb = OpbFile::open(Cursor::new(bytes.clone())).unwrap();
        let whole = opb.read_to_end().unwrap();
        assert_eq!(whole.len(), 13);

        let mut opb = OpbFile::open(Cursor::new(bytes)).unwrap();
        let mut one = [OplCommand::default(); 1];
        let mut collected = Vec::new();
        loop {
            let count = opb.read_buffer(&mut one).unwrap();
            if count == 0 {
                break;
            }
            collected.push(one[0]);
        }
        assert_eq!(collected, whole);
    }

    #[test]
    fn note_on_round_trip() {
        let song = vec![
            cmd(0.050, 0x0A0, 0x44),
            cmd(0.050, 0x0B0, 0x21),
            cmd(0.050, 0x040, 0x2A),
        ];
        let bytes = encode(OpbFormat::Default, &song);

        let mut opb = OpbFile::open(Cursor::new(bytes)).unwrap();
        let decoded = opb.read_to_end().unwrap();
        assert_streams_equal(&decoded, &song);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode(OpbFormat::Default, &[cmd(0.0, 0x020, 0x01)]);
        bytes[0] = b'X';
        let err = OpbFile::open(Cursor::new(bytes)).unwrap_err();
        assert_eq!(err, OpbError::NotAnOpbFile);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = encode(OpbFormat::Default, &[cmd(0.0, 0x020, 0x01)]);
        bytes[5] = b'2';
        let err = OpbFile::open(Cursor::new(bytes)).unwrap_err();
        assert_eq!(err, OpbError::VersionUnsupported);
    }

    #[test]
    fn nonzero_terminator_is_rejected() {
        let mut bytes = encode(OpbFormat::Default, &[cmd(0.0, 0x020, 0x01)]);
        bytes[6] = 1;
        let err = OpbFile::open(Cursor::new(bytes)).unwrap_err();
        assert_eq!(err, OpbError::NotAnOpbFile);
    }

    #[test]
    fn unknown_format_byte_is_rejected() {
        let mut bytes = encode(OpbFormat::Default, &[cmd(0.0, 0x020, 0x01)]);
        bytes[7] = 2;
        let err = OpbFile::open(Cursor::new(bytes)).unwrap_err();
        assert_eq!(err, OpbError::Logged);
    }

    #[test]
    fn truncated_chunk_poisons_the_reader() {
        let mut bytes = encode(OpbFormat::Default, &canonical_song());
        bytes.truncate(bytes.len() - 3);

        let mut opb = OpbFile::open(Cursor::new(bytes)).unwrap();
        let mut buffer = [OplCommand::default(); 8];
        let mut last = Ok(0);
        for _ in 0..64 {
            last = opb.read_buffer(&mut buffer);
            if last.is_err() {
                break;
            }
        }
        assert_eq!(last, Err(OpbError::Read));
        assert_eq!(opb.read_buffer(&mut buffer), Err(OpbError::Read));
    }

    #[test]
    fn reset_rewinds_to_the_first_chunk() {
        let bytes = encode(OpbFormat::Default, &canonical_song());
        let mut opb = OpbFile::open(Cursor::new(bytes)).unwrap();

        let first = opb.read_to_end().unwrap();
        opb.reset().unwrap();
        let second = opb.read_to_end().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn legacy_decode_needs_no_seeking() {
        let song = canonical_song();
        let bytes = encode(OpbFormat::Default, &song);

        let mut seekable = OpbFile::open(Cursor::new(bytes.clone())).unwrap();
        let expected = seekable.read_to_end().unwrap();

        let mut collected = Vec::new();
        binary_to_opl(&bytes[..], |batch| {
            collected.extend_from_slice(batch);
            Ok(())
        })
        .unwrap();
        assert_eq!(collected, expected);
    }

    #[test]
    fn receiver_failure_maps_to_a_buffer_error() {
        let bytes = encode(OpbFormat::Default, &canonical_song());
        let err = binary_to_opl(&bytes[..], |_| Err(OpbError::Buffer)).unwrap_err();
        assert_eq!(err, OpbError::Buffer);
    }

    #[test]
    fn file_round_trip() {
        let song = canonical_song();
        let path = std::env::temp_dir().join(format!("opb_file_test_{}.opb", std::process::id()));

        opl_to_file(OpbFormat::Default, &song, &path).unwrap();
        let mut opb = OpbFile::open_file(&path).unwrap();
        let decoded = opb.read_to_end().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_streams_equal(&decoded, &song);
    }
}
