//! On-chip flash backing for the settings journal.
//!
//! The last two 4 KiB sectors of the 2 MiB part are reserved. Page programs
//! run with interrupts briefly masked (~1 ms, tolerated by the real-time
//! workers); the journal only erases the sector without live data, so the
//! ~45 ms erase is safe whenever the permit predicate allows it.

use embassy_rp::flash::{Blocking, Flash, ERASE_SIZE};
use embassy_rp::peripherals::FLASH;
use flash_journal::{FlashError, SectorFlash, PAGES_PER_SECTOR, PAGE_LEN, SECTOR_COUNT};

/// Total flash size of the part.
pub const FLASH_SIZE: usize = 2 * 1024 * 1024;

/// Byte offset of the reserved settings region.
pub const SETTINGS_BASE: u32 = (FLASH_SIZE - SECTOR_COUNT * ERASE_SIZE) as u32;

/// [`SectorFlash`] over the RP2040 XIP flash.
pub struct RpFlash {
    flash: Flash<'static, FLASH, Blocking, FLASH_SIZE>,
}

impl RpFlash {
    #[must_use]
    pub fn new(flash: Flash<'static, FLASH, Blocking, FLASH_SIZE>) -> Self {
        Self { flash }
    }

    fn offset(sector: usize, page: usize) -> Result<u32, FlashError> {
        if sector >= SECTOR_COUNT || page >= PAGES_PER_SECTOR {
            return Err(FlashError::Io);
        }
        Ok(SETTINGS_BASE + (sector * ERASE_SIZE + page * PAGE_LEN) as u32)
    }
}

impl SectorFlash for RpFlash {
    fn read_page(&mut self, sector: usize, page: usize) -> Result<[u8; PAGE_LEN], FlashError> {
        let offset = Self::offset(sector, page)?;
        let mut out = [0u8; PAGE_LEN];
        self.flash
            .blocking_read(offset, &mut out)
            .map_err(|_| FlashError::Io)?;
        Ok(out)
    }

    fn program_page(
        &mut self,
        sector: usize,
        page: usize,
        data: &[u8; PAGE_LEN],
    ) -> Result<(), FlashError> {
        let offset = Self::offset(sector, page)?;
        // The flash driver masks interrupts and parks the other core for
        // the duration of the program; a page stays under 1 ms.
        self.flash
            .blocking_write(offset, data)
            .map_err(|_| FlashError::Io)
    }

    fn erase_sector(&mut self, sector: usize) -> Result<(), FlashError> {
        let from = Self::offset(sector, 0)?;
        let to = from + ERASE_SIZE as u32;
        self.flash
            .blocking_erase(from, to)
            .map_err(|_| FlashError::Io)
    }
}
