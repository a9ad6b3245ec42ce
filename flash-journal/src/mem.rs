//! RAM-backed flash double with power-cut injection for the durability
//! tests.

use crate::{FlashError, SectorFlash, PAGES_PER_SECTOR, PAGE_LEN, SECTOR_COUNT};

const SECTOR_LEN: usize = PAGE_LEN * PAGES_PER_SECTOR;

/// In-memory flash.
///
/// Page programs are atomic (the hardware guarantee the journal builds on);
/// sector erases proceed page by page, so an injected power cut leaves a
/// partially-erased sector of whole untouched or whole erased pages.
#[derive(Clone)]
pub struct MemFlash {
    sectors: [[u8; SECTOR_LEN]; SECTOR_COUNT],
    /// Operations left before the injected power cut, if armed.
    budget: Option<u32>,
    programs: u32,
    erases: u32,
}

impl MemFlash {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sectors: [[0xFF; SECTOR_LEN]; SECTOR_COUNT],
            budget: None,
            programs: 0,
            erases: 0,
        }
    }

    /// Fail every operation after the next `ops` complete.
    pub fn interrupt_after(&mut self, ops: u32) {
        self.budget = Some(ops);
    }

    /// Clone the array contents as if the board rebooted: same flash image,
    /// no pending power cut.
    #[must_use]
    pub fn clone_powered_up(&self) -> Self {
        let mut flash = self.clone();
        flash.budget = None;
        flash
    }

    /// Scribble over every slot (fatal-corruption scenario).
    pub fn corrupt_all(&mut self) {
        for sector in &mut self.sectors {
            sector.fill(0xA5);
        }
    }

    #[must_use]
    pub const fn program_count(&self) -> u32 {
        self.programs
    }

    #[must_use]
    pub const fn erase_count(&self) -> u32 {
        self.erases
    }

    fn spend(&mut self) -> Result<(), FlashError> {
        match &mut self.budget {
            Some(0) => Err(FlashError::Interrupted),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check(sector: usize, page: usize) -> Result<(), FlashError> {
        if sector >= SECTOR_COUNT || page >= PAGES_PER_SECTOR {
            return Err(FlashError::Io);
        }
        Ok(())
    }
}

impl Default for MemFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl SectorFlash for MemFlash {
    fn read_page(&mut self, sector: usize, page: usize) -> Result<[u8; PAGE_LEN], FlashError> {
        Self::check(sector, page)?;
        self.spend()?;
        let off = page * PAGE_LEN;
        let mut out = [0u8; PAGE_LEN];
        out.copy_from_slice(&self.sectors[sector][off..off + PAGE_LEN]);
        Ok(out)
    }

    fn program_page(
        &mut self,
        sector: usize,
        page: usize,
        data: &[u8; PAGE_LEN],
    ) -> Result<(), FlashError> {
        Self::check(sector, page)?;
        self.spend()?;
        let off = page * PAGE_LEN;
        // NOR semantics: programming only clears bits.
        for (dst, &src) in self.sectors[sector][off..off + PAGE_LEN]
            .iter_mut()
            .zip(data)
        {
            *dst &= src;
        }
        self.programs += 1;
        Ok(())
    }

    fn erase_sector(&mut self, sector: usize) -> Result<(), FlashError> {
        Self::check(sector, 0)?;
        for page in 0..PAGES_PER_SECTOR {
            self.spend()?;
            let off = page * PAGE_LEN;
            self.sectors[sector][off..off + PAGE_LEN].fill(0xFF);
        }
        self.erases += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_is_read_back() {
        let mut flash = MemFlash::new();
        let mut page = [0u8; PAGE_LEN];
        page[0] = 0x12;
        flash.program_page(0, 3, &page).unwrap();
        assert_eq!(flash.read_page(0, 3).unwrap(), page);
    }

    #[test]
    fn test_erase_restores_erased_state() {
        let mut flash = MemFlash::new();
        flash.program_page(1, 0, &[0u8; PAGE_LEN]).unwrap();
        flash.erase_sector(1).unwrap();
        assert_eq!(flash.read_page(1, 0).unwrap(), [0xFF; PAGE_LEN]);
    }

    #[test]
    fn test_interrupt_stops_operations() {
        let mut flash = MemFlash::new();
        flash.interrupt_after(1);
        assert!(flash.read_page(0, 0).is_ok());
        assert_eq!(
            flash.program_page(0, 0, &[0u8; PAGE_LEN]),
            Err(FlashError::Interrupted)
        );
        // The page was never touched.
        let recovered = flash.clone_powered_up().read_page(0, 0).unwrap();
        assert_eq!(recovered, [0xFF; PAGE_LEN]);
    }

    #[test]
    fn test_interrupted_erase_is_page_granular() {
        let mut flash = MemFlash::new();
        for page in 0..PAGES_PER_SECTOR {
            flash.program_page(0, page, &[0u8; PAGE_LEN]).unwrap();
        }
        flash.interrupt_after(4);
        assert_eq!(flash.erase_sector(0), Err(FlashError::Interrupted));

        let mut rebooted = flash.clone_powered_up();
        assert_eq!(rebooted.read_page(0, 0).unwrap(), [0xFF; PAGE_LEN]);
        assert_eq!(rebooted.read_page(0, 15).unwrap(), [0x00; PAGE_LEN]);
    }
}
