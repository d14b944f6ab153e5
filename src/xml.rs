//! XML projection of an OPL command stream, the human-editable form used by
//! the `opb_tool` to-xml/from-xml round trip. Register addresses and data
//! bytes are hex-formatted attributes; the instrument table is included for
//! reference when dumping but ignored on re-encode, since the encoder
//! rebuilds it from the commands.

use serde::{Deserialize, Serialize};

use crate::dtype::{OpbFormat, OplCommand};
use crate::instrument::Instrument;

#[derive(Debug, Serialize, Deserialize)]
pub struct CommandEntry {
    #[serde(rename = "@time")]
    pub time: f64,
    #[serde(rename = "@addr", with = "hex_u16")]
    pub addr: u16,
    #[serde(rename = "@data", with = "hex_u8")]
    pub data: u8,
}

impl From<OplCommand> for CommandEntry {
    fn from(cmd: OplCommand) -> CommandEntry {
        CommandEntry {
            time: cmd.time,
            addr: cmd.addr,
            data: cmd.data,
        }
    }
}

impl From<CommandEntry> for OplCommand {
    fn from(entry: CommandEntry) -> OplCommand {
        OplCommand {
            addr: entry.addr,
            data: entry.data,
            time: entry.time,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "opb")]
pub struct OpbDocument {
    #[serde(rename = "@format")]
    pub format: OpbFormat,
    #[serde(rename = "instrument", default, skip_serializing_if = "Vec::is_empty")]
    pub instruments: Vec<Instrument>,
    #[serde(rename = "command", default)]
    pub commands: Vec<CommandEntry>,
}

impl OpbDocument {
    pub fn new(
        format: OpbFormat,
        instruments: &[Instrument],
        commands: &[OplCommand],
    ) -> OpbDocument {
        OpbDocument {
            format,
            instruments: instruments.to_vec(),
            commands: commands.iter().copied().map(CommandEntry::from).collect(),
        }
    }

    pub fn into_commands(self) -> Vec<OplCommand> {
        self.commands.into_iter().map(OplCommand::from).collect()
    }
}

mod hex_u16 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        format!("0x{value:03X}").serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_hex(&text).ok_or_else(|| serde::de::Error::custom("invalid register address"))
    }
}

mod hex_u8 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &u8, serializer: S) -> Result<S::Ok, S::Error> {
        format!("0x{value:02X}").serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
        let text = String::deserialize(deserializer)?;
        let value = super::parse_hex(&text)
            .ok_or_else(|| serde::de::Error::custom("invalid data byte"))?;
        u8::try_from(value).map_err(serde::de::Error::custom)
    }
}

fn parse_hex(text: &str) -> Option<u16> {
    if let Some(stripped) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u16::from_str_radix(stripped, 16).ok()
    } else {
        text.parse::<u16>().ok()
    }
}
