//! Instrument interning. The encoder collapses the register writes that
//! define a voice's timbre into entries of a table; entries are grown in
//! place as later ranges contribute slots an earlier range left unset, and an
//! entry's index is fixed at creation so opcodes already referring to it stay
//! valid.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::dtype::{read_err, write_err, OpbError, ReadWrite};

/// Register values of one FM operator. `-1` marks a slot no range has
/// contributed yet; on the wire such slots are stored as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    #[serde(rename = "@characteristic")]
    pub characteristic: i16,
    #[serde(rename = "@attack_decay")]
    pub attack_decay: i16,
    #[serde(rename = "@sustain_release")]
    pub sustain_release: i16,
    #[serde(rename = "@wave_select")]
    pub wave_select: i16,
}

impl Default for Operator {
    fn default() -> Operator {
        Operator {
            characteristic: -1,
            attack_decay: -1,
            sustain_release: -1,
            wave_select: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    #[serde(rename = "@index")]
    pub index: usize,
    #[serde(rename = "@feedconn")]
    pub feedconn: i16,
    pub modulator: Operator,
    pub carrier: Operator,
}

impl Default for Instrument {
    fn default() -> Instrument {
        Instrument {
            index: 0,
            feedconn: -1,
            modulator: Operator::default(),
            carrier: Operator::default(),
        }
    }
}

impl ReadWrite for Instrument {
    fn write_to_file<W: Write>(&self, writer: &mut W) -> Result<usize, OpbError> {
        let clamp = |v: i16| if v >= 0 { v as u8 } else { 0 };
        let bytes = [
            clamp(self.feedconn),
            clamp(self.modulator.characteristic),
            clamp(self.modulator.attack_decay),
            clamp(self.modulator.sustain_release),
            clamp(self.modulator.wave_select),
            clamp(self.carrier.characteristic),
            clamp(self.carrier.attack_decay),
            clamp(self.carrier.sustain_release),
            clamp(self.carrier.wave_select),
        ];
        writer.write_all(&bytes).map_err(write_err)?;
        Ok(bytes.len())
    }

    fn read_from_file<R: Read>(&mut self, reader: &mut R) -> Result<(), OpbError> {
        let mut bytes = [0u8; 9];
        reader.read_exact(&mut bytes).map_err(read_err)?;
        self.feedconn = i16::from(bytes[0]);
        self.modulator.characteristic = i16::from(bytes[1]);
        self.modulator.attack_decay = i16::from(bytes[2]);
        self.modulator.sustain_release = i16::from(bytes[3]);
        self.modulator.wave_select = i16::from(bytes[4]);
        self.carrier.characteristic = i16::from(bytes[5]);
        self.carrier.attack_decay = i16::from(bytes[6]);
        self.carrier.sustain_release = i16::from(bytes[7]);
        self.carrier.wave_select = i16::from(bytes[8]);
        Ok(())
    }
}

/// The slots one command range contributed towards an instrument definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialInstrument {
    pub feedconn: Option<u8>,
    pub mod_characteristic: Option<u8>,
    pub mod_attack_decay: Option<u8>,
    pub mod_sustain_release: Option<u8>,
    pub mod_wave_select: Option<u8>,
    pub car_characteristic: Option<u8>,
    pub car_attack_decay: Option<u8>,
    pub car_sustain_release: Option<u8>,
    pub car_wave_select: Option<u8>,
}

impl PartialInstrument {
    /// Number of slots this description specifies.
    pub fn slot_count(&self) -> usize {
        [
            self.feedconn,
            self.mod_characteristic,
            self.mod_attack_decay,
            self.mod_sustain_release,
            self.mod_wave_select,
            self.car_characteristic,
            self.car_attack_decay,
            self.car_sustain_release,
            self.car_wave_select,
        ]
        .iter()
        .filter(|slot| slot.is_some())
        .count()
    }
}

fn slot_matches(current: i16, incoming: Option<u8>) -> bool {
    match incoming {
        None => true,
        Some(value) => current < 0 || current == i16::from(value),
    }
}

fn merge_slot(current: &mut i16, incoming: Option<u8>) {
    if let Some(value) = incoming {
        *current = i16::from(value);
    }
}

/// Append-only table of unique instruments, deduplicated by slot-wise
/// compatibility.
#[derive(Debug, Default)]
pub struct InstrumentTable {
    entries: Vec<Instrument>,
}

impl InstrumentTable {
    pub fn new() -> InstrumentTable {
        InstrumentTable::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Instrument] {
        &self.entries
    }

    /// Find the first entry compatible with `partial`, merge the specified
    /// slots into it, and return its index; append a fresh entry when no
    /// existing one is compatible. An entry is compatible when every slot
    /// `partial` specifies is either unset in the entry or equal to it.
    pub fn intern(&mut self, partial: &PartialInstrument) -> usize {
        for entry in &mut self.entries {
            if Self::can_combine(entry, partial) {
                Self::combine(entry, partial);
                return entry.index;
            }
        }

        let mut entry = Instrument {
            index: self.entries.len(),
            ..Instrument::default()
        };
        Self::combine(&mut entry, partial);
        self.entries.push(entry);
        entry.index
    }

    fn can_combine(entry: &Instrument, partial: &PartialInstrument) -> bool {
        slot_matches(entry.feedconn, partial.feedconn)
            && slot_matches(entry.modulator.characteristic, partial.mod_characteristic)
            && slot_matches(entry.modulator.attack_decay, partial.mod_attack_decay)
            && slot_matches(entry.modulator.sustain_release, partial.mod_sustain_release)
            && slot_matches(entry.modulator.wave_select, partial.mod_wave_select)
            && slot_matches(entry.carrier.characteristic, partial.car_characteristic)
            && slot_matches(entry.carrier.attack_decay, partial.car_attack_decay)
            && slot_matches(entry.carrier.sustain_release, partial.car_sustain_release)
            && slot_matches(entry.carrier.wave_select, partial.car_wave_select)
    }

    fn combine(entry: &mut Instrument, partial: &PartialInstrument) {
        merge_slot(&mut entry.feedconn, partial.feedconn);
        merge_slot(&mut entry.modulator.characteristic, partial.mod_characteristic);
        merge_slot(&mut entry.modulator.attack_decay, partial.mod_attack_decay);
        merge_slot(&mut entry.modulator.sustain_release, partial.mod_sustain_release);
        merge_slot(&mut entry.modulator.wave_select, partial.mod_wave_select);
        merge_slot(&mut entry.carrier.characteristic, partial.car_characteristic);
        merge_slot(&mut entry.carrier.attack_decay, partial.car_attack_decay);
        merge_slot(&mut entry.carrier.sustain_release, partial.car_sustain_release);
        merge_slot(&mut entry.carrier.wave_select, partial.car_wave_select);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn full_partial() -> PartialInstrument {
        PartialInstrument {
            feedconn: Some(0x0E),
            mod_characteristic: Some(0x21),
            mod_attack_decay: Some(0xF4),
            mod_sustain_release: Some(0x7F),
            mod_wave_select: Some(0x01),
            car_characteristic: Some(0x61),
            car_attack_decay: Some(0xD2),
            car_sustain_release: Some(0x36),
            car_wave_select: Some(0x00),
        }
    }

    #[test]
    fn identical_definitions_share_an_entry() {
        let mut table = InstrumentTable::new();
        assert_eq!(table.intern(&full_partial()), 0);
        assert_eq!(table.intern(&full_partial()), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn partial_definition_fills_unset_slots() {
        let mut table = InstrumentTable::new();
        let first = PartialInstrument {
            mod_characteristic: Some(0x21),
            ..PartialInstrument::default()
        };
        assert_eq!(table.intern(&first), 0);
        assert_eq!(table.entries()[0].modulator.attack_decay, -1);

        let second = PartialInstrument {
            mod_characteristic: Some(0x21),
            mod_attack_decay: Some(0xF4),
            ..PartialInstrument::default()
        };
        assert_eq!(table.intern(&second), 0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries()[0].modulator.attack_decay, 0xF4);
    }

    #[test]
    fn conflicting_slot_creates_a_new_entry() {
        let mut table = InstrumentTable::new();
        assert_eq!(table.intern(&full_partial()), 0);

        let mut changed = full_partial();
        changed.car_wave_select = Some(0x03);
        assert_eq!(table.intern(&changed), 1);
        assert_eq!(table.len(), 2);
        // the original entry keeps its value
        assert_eq!(table.entries()[0].carrier.wave_select, 0x00);
    }

    #[test]
    fn carrier_wave_select_is_matched_like_every_other_slot() {
        let mut table = InstrumentTable::new();
        let first = PartialInstrument {
            car_wave_select: Some(0x02),
            ..PartialInstrument::default()
        };
        assert_eq!(table.intern(&first), 0);

        let second = PartialInstrument {
            car_wave_select: Some(0x05),
            ..PartialInstrument::default()
        };
        assert_eq!(table.intern(&second), 1);
    }

    #[test]
    fn wire_entry_is_nine_bytes_with_unset_slots_as_zero() {
        let mut instr = Instrument::default();
        instr.feedconn = 0x0E;
        instr.modulator.characteristic = 0x21;
        instr.carrier.wave_select = 0x03;

        let mut out = Vec::new();
        assert_eq!(instr.write_to_file(&mut out).unwrap(), 9);
        assert_eq!(out, [0x0E, 0x21, 0, 0, 0, 0, 0, 0, 0x03]);

        let mut back = Instrument::default();
        back.read_from_file(&mut Cursor::new(&out)).unwrap();
        assert_eq!(back.feedconn, 0x0E);
        assert_eq!(back.modulator.characteristic, 0x21);
        assert_eq!(back.modulator.attack_decay, 0);
        assert_eq!(back.carrier.wave_select, 0x03);
    }
}
