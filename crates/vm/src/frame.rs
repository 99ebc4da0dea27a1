//! 帧表：所有正被用户页使用的物理页帧，时钟算法在这上面选择换出的牺牲者

use alloc::vec::Vec;

use slab::Slab;
use smallvec::SmallVec;
use triomphe::Arc;

use crate::{PageRef, PageTableRef, PhysPageNum, VirtPageNum};

/// 帧在帧表中的下标
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameHandle(usize);

/// 页所持有的物理帧
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    handle: FrameHandle,
    ppn: PhysPageNum,
}

impl Frame {
    pub fn handle(&self) -> FrameHandle {
        self.handle
    }

    pub fn ppn(&self) -> PhysPageNum {
        self.ppn
    }
}

/// 驻留在某个帧中的页，以及映射了它的页表
pub(crate) struct Resident {
    pub vpn: VirtPageNum,
    pub page: PageRef,
    pub page_table: PageTableRef,
}

struct FrameEntry {
    ppn: PhysPageNum,
    // 只有 fork 出的文件页会共享帧，所以通常只有一项。为空表示还未 attach
    residents: SmallVec<[Resident; 1]>,
}

/// 一次时钟扫描的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Victim {
    Found(FrameHandle),
    /// 表非空，但所有帧都还没有 attach，正被其他线程填充
    InFlight,
    Empty,
}

#[derive(Default)]
pub(crate) struct FrameTable {
    frames: Slab<FrameEntry>,
    // 时钟指针，指向下一次扫描开始的下标
    hand: usize,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// 登记一个新分配的帧。此时它还没有 attach 到页上，不会被选为牺牲者
    pub fn insert(&mut self, ppn: PhysPageNum) -> Frame {
        let key = self.frames.insert(FrameEntry {
            ppn,
            residents: SmallVec::new(),
        });
        Frame {
            handle: FrameHandle(key),
            ppn,
        }
    }

    pub fn frame(&self, handle: FrameHandle) -> Frame {
        Frame {
            handle,
            ppn: self.frames[handle.0].ppn,
        }
    }

    pub fn attach(&mut self, handle: FrameHandle, resident: Resident) {
        self.frames[handle.0].residents.push(resident);
    }

    /// 将 `page` 从帧上摘下。最后一个页离开时帧从表中移除，返回其物理页号
    pub fn detach(&mut self, handle: FrameHandle, page: &PageRef) -> Option<PhysPageNum> {
        let entry = self.frames.get_mut(handle.0)?;
        entry.residents.retain(|r| !Arc::ptr_eq(&r.page, page));
        if entry.residents.is_empty() {
            Some(self.frames.remove(handle.0).ppn)
        } else {
            None
        }
    }

    pub fn remove(&mut self, handle: FrameHandle) -> PhysPageNum {
        self.frames.remove(handle.0).ppn
    }

    pub fn take_residents(&mut self, handle: FrameHandle) -> SmallVec<[Resident; 1]> {
        core::mem::take(&mut self.frames[handle.0].residents)
    }

    /// 时钟算法。访问位被置上的帧清除访问位后跳过，第一个访问位为空的帧即为牺牲者
    ///
    /// 共享的帧只要有一个页表访问过就算访问过
    pub fn pick_victim(&mut self) -> Victim {
        let keys: Vec<usize> = self.frames.iter().map(|(key, _)| key).collect();
        if keys.is_empty() {
            return Victim::Empty;
        }
        let start = keys.partition_point(|&key| key < self.hand);
        // 转两圈之后所有访问位都已清空，一定能找到
        for i in 0..2 * keys.len() {
            let key = keys[(start + i) % keys.len()];
            let entry = &self.frames[key];
            if entry.residents.is_empty() {
                continue;
            }
            let mut accessed = false;
            for resident in &entry.residents {
                let mut page_table = resident.page_table.lock();
                if page_table.is_accessed(resident.vpn) {
                    page_table.set_accessed(resident.vpn, false);
                    accessed = true;
                }
            }
            if !accessed {
                self.hand = key + 1;
                return Victim::Found(FrameHandle(key));
            }
        }
        // 转两圈仍没选中，说明已 attach 的帧都在扫描期间被重新访问，或者所有帧都还在填充中
        Victim::InFlight
    }

    /// 持有 `page` 的帧的数量
    #[cfg(test)]
    pub fn holders_of(&self, page: &PageRef) -> usize {
        self.frames
            .iter()
            .filter(|(_, entry)| entry.residents.iter().any(|r| Arc::ptr_eq(&r.page, page)))
            .count()
    }

    #[cfg(test)]
    pub fn residents_of(&self, handle: FrameHandle) -> usize {
        self.frames[handle.0].residents.len()
    }
}
