use common::config::PAGE_SIZE;
use defines::error::{errno, KResult};

use crate::{swap::SwapStore, SwapSlot};

/// 匿名页，被换出时内容保存在交换槽中
#[derive(Debug, Default)]
pub struct AnonPage {
    slot: Option<SwapSlot>,
}

impl AnonPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_swapped(&self) -> bool {
        self.slot.is_some()
    }

    /// 从交换槽读回内容并归还槽。没有槽的页本就是全零的
    pub(super) fn swap_in(&mut self, swap: &SwapStore, bytes: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        if let Some(slot) = self.slot.take() {
            if let Err(e) = swap.read(&slot, bytes) {
                self.slot = Some(slot);
                return Err(e);
            }
            swap.release_slot(slot);
        }
        Ok(())
    }

    pub(super) fn swap_out(&mut self, swap: &SwapStore, bytes: &[u8; PAGE_SIZE]) -> KResult<()> {
        debug_assert!(self.slot.is_none());
        let slot = swap.claim_slot().ok_or(errno::ENOSPC)?;
        if let Err(e) = swap.write(&slot, bytes) {
            swap.release_slot(slot);
            return Err(e);
        }
        self.slot = Some(slot);
        Ok(())
    }

    /// 读出被换出的内容而不归还槽，fork 时用
    pub(crate) fn read_swapped(&self, swap: &SwapStore, bytes: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        match &self.slot {
            Some(slot) => swap.read(slot, bytes),
            None => Ok(()),
        }
    }

    pub(super) fn release(&mut self, swap: &SwapStore) {
        if let Some(slot) = self.slot.take() {
            swap.release_slot(slot);
        }
    }
}
