//! 缺页处理

use common::config::{STACK_FLOOR, STACK_SLACK, USER_STACK};
use defines::error::{errno, KResult};
use triomphe::Arc;

use super::MemorySpace;
use crate::VirtAddr;

/// 一次缺页异常的信息
#[derive(Clone, Copy, Debug)]
pub struct PageFault {
    pub addr: VirtAddr,
    /// 是否发生在用户态
    pub is_user: bool,
    pub write: bool,
    /// 页表中没有映射，而非权限不足
    pub not_present: bool,
    /// 陷入时的用户栈指针，仅在 `is_user` 时有意义
    pub trap_sp: usize,
}

impl PageFault {
    pub fn user(addr: VirtAddr, write: bool, not_present: bool, sp: usize) -> Self {
        Self {
            addr,
            is_user: true,
            write,
            not_present,
            trap_sp: sp,
        }
    }

    /// 内核代为访问用户内存时发生的缺页，栈指针取进入内核时保存的那个
    pub fn kernel(addr: VirtAddr, write: bool, not_present: bool) -> Self {
        Self {
            addr,
            is_user: false,
            write,
            not_present,
            trap_sp: 0,
        }
    }
}

/// `addr` 是否像是在栈指针附近的压栈
fn is_stack_access(addr: VirtAddr, sp: usize) -> bool {
    addr.round_down().0 >= STACK_FLOOR
        && addr.0 < USER_STACK
        && addr.0 >= sp.saturating_sub(STACK_SLACK)
}

impl MemorySpace {
    /// 返回 `false` 时调用者应当结束进程
    pub fn handle_page_fault(&mut self, fault: &PageFault) -> bool {
        match self.try_handle_page_fault(fault) {
            Ok(()) => true,
            Err(e) => {
                warn!("reject page fault {fault:?}: {e}");
                false
            }
        }
    }

    pub fn try_handle_page_fault(&mut self, fault: &PageFault) -> KResult<()> {
        trace!("page fault {fault:?}");
        let addr = fault.addr;
        if addr.is_null() || addr.is_kernel() {
            return Err(errno::EFAULT);
        }
        let vpn = addr.vpn_floor();
        let Some(page) = self.spt.get(vpn).map(Arc::clone) else {
            let sp = if fault.is_user {
                fault.trap_sp
            } else {
                self.saved_user_sp
            };
            if fault.not_present && is_stack_access(addr, sp) {
                return self.grow_stack(vpn);
            }
            return Err(errno::EFAULT);
        };
        {
            let page = page.lock();
            if fault.write && !page.is_writable() {
                return Err(errno::EFAULT);
            }
            // 已驻留却仍然缺页，只能是权限问题
            if page.is_resident() {
                return match self.page_table.lock().translate(vpn) {
                    Some(_) => Ok(()),
                    None => Err(errno::EFAULT),
                };
            }
        }
        self.do_claim(&page)
    }
}

#[cfg(test)]
mod tests {
    use common::config::{PAGE_SIZE, STACK_FLOOR, USER_STACK};

    use super::is_stack_access;
    use crate::VirtAddr;

    #[test]
    fn stack_heuristic() {
        let sp = USER_STACK - PAGE_SIZE;
        assert!(is_stack_access(VirtAddr(sp - 8), sp));
        assert!(is_stack_access(VirtAddr(sp + 16), sp));
        assert!(!is_stack_access(VirtAddr(sp - 9), sp));
        assert!(!is_stack_access(VirtAddr(USER_STACK), sp));
        // 栈的下限之外
        assert!(!is_stack_access(VirtAddr(STACK_FLOOR - 1), 0));
        assert!(is_stack_access(VirtAddr(STACK_FLOOR), 0));
    }
}
