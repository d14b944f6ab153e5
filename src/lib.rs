//! Codec for the OPB binary format: a compact container for timestamped
//! OPL3 register-write streams. The encoder groups writes into per-channel
//! musical events, interns instrument definitions into a shared table, and
//! replaces groups of primitive writes with synthetic opcodes where that is
//! smaller; the decoder streams the file back out as primitive writes.

pub mod binutils;
pub mod decoder;
pub mod dtype;
pub mod encoder;
pub mod fileutils;
pub mod instrument;
pub mod opl;
pub mod xml;

pub use decoder::{binary_to_opl, file_to_opl, HeaderInfo, OpbFile};
pub use dtype::{OpbError, OpbFormat, OplCommand};
pub use encoder::{opl_to_binary, opl_to_file};
pub use instrument::{Instrument, Operator};
