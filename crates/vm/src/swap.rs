//! 交换区。交换盘按页切分为固定大小的槽，匿名页被换出时写入其中

use alloc::sync::Arc;

use common::config::{PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE};
use defines::error::KResult;
use idallocator::BitAllocator;
use klocks::SpinMutex;

use crate::hal::BlockDevice;

/// 被占用的交换槽。不可复制，归还后即失效
#[derive(Debug, PartialEq, Eq)]
pub struct SwapSlot(usize);

impl SwapSlot {
    pub fn index(&self) -> usize {
        self.0
    }

    fn first_sector(&self) -> u64 {
        (self.0 * SECTORS_PER_PAGE) as u64
    }
}

pub struct SwapStore {
    disk: Arc<dyn BlockDevice>,
    // 只在分配和归还时持有，不跨越磁盘读写
    slots: SpinMutex<BitAllocator>,
}

impl SwapStore {
    pub fn new(disk: Arc<dyn BlockDevice>) -> Self {
        let slot_count = disk.sector_count() as usize / SECTORS_PER_PAGE;
        Self {
            disk,
            slots: SpinMutex::new(BitAllocator::new(slot_count)),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.lock().capacity()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.lock().free_count()
    }

    /// 交换区已满时返回 `None`
    pub fn claim_slot(&self) -> Option<SwapSlot> {
        let slot = self.slots.lock().alloc().map(SwapSlot);
        trace!("claim swap slot {slot:?}");
        slot
    }

    pub fn release_slot(&self, slot: SwapSlot) {
        trace!("release swap slot {}", slot.0);
        self.slots.lock().dealloc(slot.0);
    }

    pub fn read(&self, slot: &SwapSlot, dst: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        let mut buf = [0; SECTOR_SIZE];
        for (sector, chunk) in (slot.first_sector()..).zip(dst.chunks_exact_mut(SECTOR_SIZE)) {
            self.disk.read_sector(sector, &mut buf)?;
            chunk.copy_from_slice(&buf);
        }
        Ok(())
    }

    pub fn write(&self, slot: &SwapSlot, src: &[u8; PAGE_SIZE]) -> KResult<()> {
        let mut buf = [0; SECTOR_SIZE];
        for (sector, chunk) in (slot.first_sector()..).zip(src.chunks_exact(SECTOR_SIZE)) {
            buf.copy_from_slice(chunk);
            self.disk.write_sector(sector, &buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::config::{PAGE_SIZE, SECTORS_PER_PAGE};

    use super::SwapStore;
    use crate::testing::RamDisk;

    #[test]
    fn slots_partition_the_disk() {
        // 多出的半页扇区不构成一个槽
        let disk = Arc::new(RamDisk::new(3 * SECTORS_PER_PAGE + SECTORS_PER_PAGE / 2));
        let swap = SwapStore::new(disk);
        assert_eq!(swap.slot_count(), 3);
        let slots: Vec<_> = (0..3).map(|_| swap.claim_slot().unwrap()).collect();
        assert!(swap.claim_slot().is_none());
        assert_eq!(swap.free_slots(), 0);
        for slot in slots {
            swap.release_slot(slot);
        }
        assert_eq!(swap.free_slots(), 3);
    }

    #[test]
    fn slot_contents_stay_separate() {
        let swap = SwapStore::new(Arc::new(RamDisk::new(2 * SECTORS_PER_PAGE)));
        let first = swap.claim_slot().unwrap();
        let second = swap.claim_slot().unwrap();
        let pattern: Box<[u8; PAGE_SIZE]> = Box::new(core::array::from_fn(|i| (i % 251) as u8));
        swap.write(&first, &pattern).unwrap();
        swap.write(&second, &[0xa5; PAGE_SIZE]).unwrap();

        let mut buf = Box::new([0; PAGE_SIZE]);
        swap.read(&first, &mut buf).unwrap();
        assert_eq!(buf, pattern);
        swap.read(&second, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xa5));
    }

    #[test]
    fn empty_disk_has_no_slots() {
        let swap = SwapStore::new(Arc::new(RamDisk::new(SECTORS_PER_PAGE - 1)));
        assert_eq!(swap.slot_count(), 0);
        assert!(swap.claim_slot().is_none());
    }
}
