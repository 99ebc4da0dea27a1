//! 定长的位图 id 分配器
//!
//! 每个 bit 表示一个 id 是否被占用，分配时从上一次分配的位置开始找空闲位

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{vec, vec::Vec};

const BITS: usize = u64::BITS as usize;

/// 基于位图的分配器，容量在创建时确定
#[derive(Clone, Debug)]
pub struct BitAllocator {
    words: Vec<u64>,
    capacity: usize,
    used: usize,
    /// 下一次从哪个字开始查找
    cursor: usize,
}

impl BitAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(BITS)],
            capacity,
            used: 0,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.capacity - self.used
    }

    pub fn alloc(&mut self) -> Option<usize> {
        if self.used == self.capacity {
            return None;
        }
        let nwords = self.words.len();
        for i in 0..nwords {
            let word_idx = (self.cursor + i) % nwords;
            let word = self.words[word_idx];
            if word == u64::MAX {
                continue;
            }
            let bit = (!word).trailing_zeros() as usize;
            let id = word_idx * BITS + bit;
            // 最后一个字中超出容量的部分不能分配
            if id >= self.capacity {
                continue;
            }
            self.words[word_idx] |= 1 << bit;
            self.used += 1;
            self.cursor = word_idx;
            return Some(id);
        }
        None
    }

    pub fn dealloc(&mut self, id: usize) {
        debug_assert!(id < self.capacity);
        let (word_idx, bit) = (id / BITS, id % BITS);
        debug_assert!(self.words[word_idx] & (1 << bit) != 0, "id {id} has been deallocated!");
        self.words[word_idx] &= !(1 << bit);
        self.used -= 1;
    }

    pub fn is_allocated(&self, id: usize) -> bool {
        id < self.capacity && self.words[id / BITS] & (1 << (id % BITS)) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::BitAllocator;

    #[test]
    fn alloc_until_exhausted() {
        let mut allocator = BitAllocator::new(70);
        let mut ids: Vec<usize> = (0..70).map(|_| allocator.alloc().unwrap()).collect();
        assert_eq!(allocator.alloc(), None);
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 70);
        assert!(ids.iter().all(|&id| id < 70));
        assert_eq!(allocator.free_count(), 0);
    }

    #[test]
    fn dealloc_makes_id_reusable() {
        let mut allocator = BitAllocator::new(3);
        let a = allocator.alloc().unwrap();
        let b = allocator.alloc().unwrap();
        let c = allocator.alloc().unwrap();
        assert_eq!(allocator.alloc(), None);
        allocator.dealloc(b);
        assert!(!allocator.is_allocated(b));
        assert!(allocator.is_allocated(a) && allocator.is_allocated(c));
        assert_eq!(allocator.alloc(), Some(b));
    }

    #[test]
    fn zero_capacity() {
        let mut allocator = BitAllocator::new(0);
        assert_eq!(allocator.alloc(), None);
        assert_eq!(allocator.free_count(), 0);
    }
}
