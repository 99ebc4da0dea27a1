//! 以 MMU 的方式访问用户内存：查页表，置访问位和脏位，缺页时走缺页处理

use common::config::PAGE_SIZE;
use defines::error::{errno, KResult};

use super::{fault::PageFault, page_table::AccessFault, MemorySpace};
use crate::VirtAddr;

impl MemorySpace {
    pub fn read_user(&mut self, addr: VirtAddr, buf: &mut [u8]) -> KResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let va = VirtAddr(addr.0.checked_add(done).ok_or(errno::EFAULT)?);
            let len = (PAGE_SIZE - va.page_offset()).min(buf.len() - done);
            let dst = &mut buf[done..done + len];
            self.with_user_page(va, false, |bytes| {
                dst.copy_from_slice(&bytes[va.page_offset()..va.page_offset() + len]);
            })?;
            done += len;
        }
        Ok(())
    }

    pub fn write_user(&mut self, addr: VirtAddr, buf: &[u8]) -> KResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let va = VirtAddr(addr.0.checked_add(done).ok_or(errno::EFAULT)?);
            let len = (PAGE_SIZE - va.page_offset()).min(buf.len() - done);
            let src = &buf[done..done + len];
            self.with_user_page(va, true, |bytes| {
                bytes[va.page_offset()..va.page_offset() + len].copy_from_slice(src);
            })?;
            done += len;
        }
        Ok(())
    }

    /// 在页表锁内访问 `va` 所在的帧，此时帧不会被换出。缺页则处理后重试
    fn with_user_page(
        &mut self,
        va: VirtAddr,
        write: bool,
        f: impl FnOnce(&mut [u8; PAGE_SIZE]),
    ) -> KResult<()> {
        let vpn = va.vpn_floor();
        loop {
            let fault = match self.page_table.lock().access(vpn, write) {
                Ok(ppn) => {
                    // SAFETY: 换出前需先拿页表锁取消映射，持有页表锁期间帧一直属于这个页
                    f(unsafe { self.vm.frame_bytes(ppn) });
                    return Ok(());
                }
                Err(fault) => fault,
            };
            let fault = PageFault::kernel(va, write, fault == AccessFault::NotPresent);
            self.try_handle_page_fault(&fault)?;
        }
    }
}
