//! Pattern bank persisted on the external QSPI flash.
//!
//! The first 4 KiB sector holds a header marking the flash as formatted by
//! this firmware. Each pattern slot lives in a sector of its own, so it can be
//! rewritten without touching the others:
//!
//! | Offset | Content                       |
//! |--------|-------------------------------|
//! | 0      | record marker                 |
//! | 1..20  | pattern record                |
//! | 20     | checksum of the record bytes  |

use daisy::flash::{Flash, FlashErase};
use tact_control::pattern::{Pattern, RECORD_LEN, SLOTS};
use tact_control::Storage;

const SECTOR_SIZE: u32 = 4096;
const HEADER: [u8; 5] = *b"TACT\x01";
const RECORD_MARKER: u8 = 0xA5;
const SLOT_LEN: usize = RECORD_LEN + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum FlashError {
    /// The slot was never written.
    Unformatted,
    /// The slot was written but its checksum does not match.
    Corrupt,
}

pub struct FlashStorage {
    flash: Flash,
}

impl FlashStorage {
    pub fn new(flash: Flash) -> Self {
        Self { flash }
    }
}

impl Storage for FlashStorage {
    type Error = FlashError;

    fn has_valid_data(&mut self) -> Result<bool, Self::Error> {
        let mut header = [0; HEADER.len()];
        self.flash.read(0, &mut header);
        Ok(header == HEADER)
    }

    fn mark_valid(&mut self) -> Result<(), Self::Error> {
        if self.has_valid_data()? {
            return Ok(());
        }
        self.flash.erase(FlashErase::Sector4K(0));
        self.flash.write(0, &HEADER);
        Ok(())
    }

    fn read_pattern(&mut self, slot: usize) -> Result<Pattern, Self::Error> {
        let mut bytes = [0; SLOT_LEN];
        self.flash.read(slot_address(slot), &mut bytes);
        decode_slot(&bytes)
    }

    fn write_pattern(&mut self, slot: usize, pattern: &Pattern) -> Result<(), Self::Error> {
        let address = slot_address(slot);
        self.flash.erase(FlashErase::Sector4K(address));
        self.flash.write(address, &encode_slot(pattern));
        defmt::debug!("Wrote pattern={} to flash", slot);
        Ok(())
    }
}

fn slot_address(slot: usize) -> u32 {
    debug_assert!(slot < SLOTS);
    SECTOR_SIZE * (slot as u32 + 1)
}

fn encode_slot(pattern: &Pattern) -> [u8; SLOT_LEN] {
    let record = pattern.to_bytes();
    let mut bytes = [0; SLOT_LEN];
    bytes[0] = RECORD_MARKER;
    bytes[1..=RECORD_LEN].copy_from_slice(&record);
    bytes[SLOT_LEN - 1] = checksum(&record);
    bytes
}

fn decode_slot(bytes: &[u8; SLOT_LEN]) -> Result<Pattern, FlashError> {
    if bytes[0] != RECORD_MARKER {
        return Err(FlashError::Unformatted);
    }
    let mut record = [0; RECORD_LEN];
    record.copy_from_slice(&bytes[1..=RECORD_LEN]);
    if checksum(&record) != bytes[SLOT_LEN - 1] {
        return Err(FlashError::Corrupt);
    }
    Ok(Pattern::from_bytes(&record))
}

fn checksum(record: &[u8; RECORD_LEN]) -> u8 {
    record
        .iter()
        .fold(0_u8, |sum, byte| sum.rotate_left(1) ^ byte)
}
