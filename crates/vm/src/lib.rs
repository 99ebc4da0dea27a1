//! 按需分页的用户虚拟内存管理
//!
//! 全局只有一个 [`VirtualMemory`]，持有帧表和交换区。每个进程一个 [`MemorySpace`]，
//! 持有补充页表和页表，缺页、mmap、fork 复制和回收都在它上面进行

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;
extern crate alloc;

mod address;
mod frame;
pub mod hal;
pub mod memory_space;
pub mod page;
mod spt;
mod swap;
mod virtual_memory;

#[cfg(test)]
mod testing;

pub use self::{
    address::{PhysPageNum, VirtAddr, VirtPageNum},
    frame::{Frame, FrameHandle},
    memory_space::{
        fault::PageFault,
        page_table::{AccessFault, PTEFlags, PageTable, PageTableEntry, PageTableRef},
        MemorySpace,
    },
    page::{Initializer, Page, PageKind, PageRef, PageType},
    spt::SupplementalPageTable,
    swap::{SwapSlot, SwapStore},
    virtual_memory::VirtualMemory,
};
