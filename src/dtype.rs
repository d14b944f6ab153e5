use std::io::{Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The OPL3 has 18 two-operator channels split across two register banks.
pub const NUM_CHANNELS: usize = 18;
/// One track per channel, plus a final catch-all track for writes that do not
/// belong to any channel (timers, percussion mode, and the like).
pub const NUM_TRACKS: usize = NUM_CHANNELS + 1;

/// A single OPL3 register write: the atom of the command stream on both sides
/// of the codec.
///
/// `time` is in seconds since the start of the stream and must be
/// nondecreasing. `addr` is the 9-bit register address; bit 8 selects the
/// high bank (channels 9-17).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OplCommand {
    pub addr: u16,
    pub data: u8,
    pub time: f64,
}

impl OplCommand {
    pub fn new(addr: u16, data: u8, time: f64) -> OplCommand {
        OplCommand { addr, data, time }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum OpbFormat {
    /// Chunked stream with an instrument table and synthetic opcodes.
    #[default]
    Default,
    /// Five bytes per register write, no table, no compression.
    Raw,
}

impl OpbFormat {
    pub fn from_byte(byte: u8) -> Option<OpbFormat> {
        match byte {
            0 => Some(OpbFormat::Default),
            1 => Some(OpbFormat::Raw),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            OpbFormat::Default => 0,
            OpbFormat::Raw => 1,
        }
    }
}

/// Every failure mode of the codec. The numeric codes returned by
/// [`OpbError::code`] are stable and match the C OPBinaryLib error table, so
/// hosts that key behaviour off error numbers keep working across ports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpbError {
    /// Details of the failure were sent to the log sink.
    #[error("OPB error was logged")]
    Logged,
    #[error("A write error occurred while converting OPB")]
    Write,
    #[error("A seek error occurred while converting OPB")]
    Seek,
    #[error("A file position error occurred while converting OPB")]
    Tell,
    #[error("A read error occurred while converting OPB")]
    Read,
    /// A command receiver refused a batch of decoded commands.
    #[error("A buffer error occurred while converting OPB")]
    Buffer,
    #[error("Couldn't parse OPB file; not a valid OPB file")]
    NotAnOpbFile,
    #[error("Couldn't parse OPB file; invalid version or version unsupported")]
    VersionUnsupported,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Couldn't perform OPB_File operation; OPB_File instance was freed")]
    Disposed,
    #[error("Argument \"buffer\" cannot be NULL")]
    InvalidBuffer,
    #[error("No instrument buffer was supplied")]
    NoInstrumentBuffer,
    #[error("The supplied instrument buffer's capacity was insufficient to hold all items")]
    InstrumentBufferOverflow,
    #[error("OPB_File instance was NULL")]
    NullInstance,
    #[error("OPB_File instance's instrument buffer was already initialized")]
    InstrumentBufferError,
}

impl OpbError {
    /// Stable numeric error code, zero being reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            OpbError::Logged => 1,
            OpbError::Write => 2,
            OpbError::Seek => 3,
            OpbError::Tell => 4,
            OpbError::Read => 5,
            OpbError::Buffer => 6,
            OpbError::NotAnOpbFile => 7,
            OpbError::VersionUnsupported => 8,
            OpbError::OutOfMemory => 9,
            OpbError::Disposed => 10,
            OpbError::InvalidBuffer => 11,
            OpbError::NoInstrumentBuffer => 12,
            OpbError::InstrumentBufferOverflow => 13,
            OpbError::NullInstance => 16,
            OpbError::InstrumentBufferError => 17,
        }
    }
}

pub(crate) fn read_err(err: std::io::Error) -> OpbError {
    log::error!("OPB read error: {err}");
    OpbError::Read
}

pub(crate) fn write_err(err: std::io::Error) -> OpbError {
    log::error!("OPB write error: {err}");
    OpbError::Write
}

pub(crate) fn seek_err(err: std::io::Error) -> OpbError {
    log::error!("OPB seek error: {err}");
    OpbError::Seek
}

pub(crate) fn tell_err(err: std::io::Error) -> OpbError {
    log::error!("OPB file position error: {err}");
    OpbError::Tell
}

/// Serialization to and from the fixed-layout binary structures of the OPB
/// container. Returns the number of bytes written so callers can account for
/// stream offsets without a second pass.
pub trait ReadWrite {
    fn write_to_file<W: Write>(&self, writer: &mut W) -> Result<usize, OpbError>;
    fn read_from_file<R: Read>(&mut self, reader: &mut R) -> Result<(), OpbError>;
}

/// Adapter that lends a [`Seek`] implementation to a forward-only byte
/// source. Every seek fails; the decoder checks seekability up front and
/// never issues one against a wrapped source.
pub struct ReadOnlySource<R: Read> {
    inner: R,
}

impl<R: Read> ReadOnlySource<R> {
    pub fn new(inner: R) -> ReadOnlySource<R> {
        ReadOnlySource { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ReadOnlySource<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read> Seek for ReadOnlySource<R> {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "source does not support seeking",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(OpbError::Logged.code(), 1);
        assert_eq!(OpbError::Read.code(), 5);
        assert_eq!(OpbError::NotAnOpbFile.code(), 7);
        assert_eq!(OpbError::VersionUnsupported.code(), 8);
        assert_eq!(OpbError::InstrumentBufferOverflow.code(), 13);
    }

    #[test]
    fn format_byte_round_trip() {
        assert_eq!(OpbFormat::from_byte(0), Some(OpbFormat::Default));
        assert_eq!(OpbFormat::from_byte(1), Some(OpbFormat::Raw));
        assert_eq!(OpbFormat::from_byte(2), None);
        assert_eq!(OpbFormat::Default.as_byte(), 0);
        assert_eq!(OpbFormat::Raw.as_byte(), 1);
    }

    #[test]
    fn format_names_match_the_c_library() {
        assert_eq!(OpbFormat::Default.to_string(), "Default");
        assert_eq!(OpbFormat::Raw.to_string(), "Raw");
    }

    #[test]
    fn read_only_source_rejects_seeks() {
        let mut source = ReadOnlySource::new(&[1u8, 2, 3][..]);
        assert!(source.seek(SeekFrom::Start(0)).is_err());
        let mut buf = [0u8; 2];
        source.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
    }
}
