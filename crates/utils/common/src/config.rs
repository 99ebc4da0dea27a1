use crate::constant::MiB;

/// 一个页大小的 bit 数
pub const PAGE_SIZE_BITS: usize = 12;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;
/// 页内偏移的掩码
pub const PAGE_OFFSET_MASK: usize = PAGE_SIZE - 1;

/// 磁盘扇区大小
pub const SECTOR_SIZE: usize = 512;
/// 一个交换槽（一页）占用的扇区数
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// 内核地址空间的起点，此后的地址用户都无权访问
pub const KERNEL_BASE: usize = 0x80_0400_0000;

/// 用户栈顶（不含）
pub const USER_STACK: usize = 0x4748_0000;
/// 用户栈最多能增长到的大小
pub const USER_STACK_LIMIT: usize = MiB;
/// 用户栈可增长到的最低地址
pub const STACK_FLOOR: usize = USER_STACK - USER_STACK_LIMIT;
/// 栈指针之下仍视作栈增长的字节数。`push` 之类的指令会先访存再修改栈指针
pub const STACK_SLACK: usize = 8;

const _: () = assert!(PAGE_SIZE % SECTOR_SIZE == 0);
