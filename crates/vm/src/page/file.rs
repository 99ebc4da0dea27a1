use common::config::PAGE_SIZE;
use defines::error::{errno, KResult};

use crate::hal::FileRef;

/// 文件中对应一页的一段：从 `offset` 开始读 `read_bytes` 字节，页的其余部分填零
pub struct FileSlice {
    file: FileRef,
    offset: usize,
    read_bytes: usize,
}

impl FileSlice {
    pub fn new(file: FileRef, offset: usize, read_bytes: usize) -> Self {
        debug_assert!(read_bytes <= PAGE_SIZE);
        Self {
            file,
            offset,
            read_bytes,
        }
    }

    pub(crate) fn load(&self, bytes: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        self.file.seek(self.offset);
        let read = self.file.read(&mut bytes[..self.read_bytes])?;
        if read != self.read_bytes {
            warn!(
                "short read at {:#x}: {read} of {} bytes",
                self.offset, self.read_bytes
            );
            return Err(errno::EIO);
        }
        bytes[self.read_bytes..].fill(0);
        Ok(())
    }

    /// 写回文件。超出文件末尾的部分不会写回
    pub(crate) fn write_back(&self, bytes: &[u8; PAGE_SIZE]) -> KResult<()> {
        if self.read_bytes == 0 {
            return Ok(());
        }
        let written = self.file.write_at(&bytes[..self.read_bytes], self.offset)?;
        if written != self.read_bytes {
            warn!(
                "short write at {:#x}: {written} of {} bytes",
                self.offset, self.read_bytes
            );
            return Err(errno::EIO);
        }
        Ok(())
    }

    /// 用重新打开的文件复制一份，读写位置与原来的独立
    pub(crate) fn duplicate(&self) -> KResult<Self> {
        Ok(Self {
            file: self.file.reopen()?,
            ..*self
        })
    }
}

/// mmap 映射的文件页
pub struct FilePage {
    slice: FileSlice,
    // 同一映射中后面是否还有页，munmap 沿着它回收整个映射
    has_next: bool,
}

impl FilePage {
    pub(crate) fn new(slice: FileSlice, has_next: bool) -> Self {
        Self { slice, has_next }
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub(super) fn swap_in(&self, bytes: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        self.slice.load(bytes)
    }

    /// 只有脏页才写回
    pub(super) fn swap_out(&self, bytes: &[u8; PAGE_SIZE], dirty: bool) -> KResult<()> {
        if dirty {
            self.slice.write_back(bytes)?;
        }
        Ok(())
    }

    pub(crate) fn duplicate(&self) -> KResult<Self> {
        Ok(Self {
            slice: self.slice.duplicate()?,
            has_next: self.has_next,
        })
    }
}
