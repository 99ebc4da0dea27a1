use core::{
    fmt,
    ops::{Add, Sub},
};

use common::config::{KERNEL_BASE, PAGE_OFFSET_MASK, PAGE_SIZE, PAGE_SIZE_BITS};

/// 物理页号
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysPageNum(pub usize);

impl fmt::Debug for PhysPageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PPN({:#x})", self.0)
    }
}

impl Add<usize> for PhysPageNum {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// 用户地址空间中的虚拟地址。`KERNEL_BASE` 及以上属于内核
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(C)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    pub const fn page_offset(&self) -> usize {
        self.0 & PAGE_OFFSET_MASK
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.page_offset() == 0
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_kernel(&self) -> bool {
        self.0 >= KERNEL_BASE
    }

    /// 向下取整到页边界
    pub const fn round_down(&self) -> VirtAddr {
        VirtAddr(self.0 & !PAGE_OFFSET_MASK)
    }

    /// 向下取整页号
    pub const fn vpn_floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 >> PAGE_SIZE_BITS)
    }

    /// 向上取整页号
    pub const fn vpn_ceil(&self) -> VirtPageNum {
        VirtPageNum(self.0.div_ceil(PAGE_SIZE))
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA({:#x})", self.0)
    }
}

impl Add<usize> for VirtAddr {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// 虚拟页号，SPT 和页表都以它为键
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPageNum(pub usize);

impl VirtPageNum {
    pub const fn page_start(&self) -> VirtAddr {
        VirtAddr(self.0 << PAGE_SIZE_BITS)
    }

    pub const fn with_offset(self, offset: usize) -> VirtAddr {
        VirtAddr(self.page_start().0 + offset)
    }
}

impl fmt::Debug for VirtPageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VPN({:#x})", self.0)
    }
}

impl Add<usize> for VirtPageNum {
    type Output = Self;

    fn add(self, len: usize) -> Self::Output {
        Self(self.0 + len)
    }
}

impl Sub<usize> for VirtPageNum {
    type Output = Self;

    fn sub(self, len: usize) -> Self::Output {
        Self(self.0 - len)
    }
}

#[cfg(test)]
mod tests {
    use common::config::{KERNEL_BASE, PAGE_SIZE};

    use super::{VirtAddr, VirtPageNum};

    #[test]
    fn rounding() {
        let va = VirtAddr(3 * PAGE_SIZE + 17);
        assert_eq!(va.page_offset(), 17);
        assert_eq!(va.round_down(), VirtAddr(3 * PAGE_SIZE));
        assert_eq!(va.vpn_floor(), VirtPageNum(3));
        assert_eq!(va.vpn_ceil(), VirtPageNum(4));
        assert_eq!(VirtAddr(4 * PAGE_SIZE).vpn_ceil(), VirtPageNum(4));
        assert_eq!(VirtPageNum(3).with_offset(17), va);
    }

    #[test]
    fn kernel_boundary() {
        assert!(!VirtAddr(KERNEL_BASE - 1).is_kernel());
        assert!(VirtAddr(KERNEL_BASE).is_kernel());
        assert!(VirtAddr(0).is_null());
        assert!(VirtAddr(0).is_page_aligned());
    }
}
