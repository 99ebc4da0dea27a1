//! 自旋锁，封装了一下 `spin::mutex::spin`
//!
//! 裁剪了一些不太需要的方法，添加 debug 模式下的死锁检测

use core::ops::{Deref, DerefMut};

/// debug 模式下自旋超过这么多次就认为发生了死锁
#[cfg(all(debug_assertions, not(test)))]
const DEADLOCK_SPINS: usize = 1 << 30;

pub struct SpinMutex<T: ?Sized> {
    base: spin::mutex::SpinMutex<T>,
}

pub struct SpinMutexGuard<'a, T: ?Sized> {
    inner: spin::mutex::SpinMutexGuard<'a, T>,
}

// Same unsafe impls as `std::sync::Mutex`
unsafe impl<T: ?Sized + Send> Sync for SpinMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for SpinMutex<T> {}

unsafe impl<T: ?Sized + Sync> Sync for SpinMutexGuard<'_, T> {}

impl<T> SpinMutex<T> {
    /// Creates a new [`SpinMutex`] wrapping the supplied data.
    #[inline(always)]
    pub const fn new(data: T) -> Self {
        Self {
            base: spin::mutex::SpinMutex::new(data),
        }
    }

    /// Consumes this [`SpinMutex`] and unwraps the underlying data.
    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.base.into_inner()
    }
}

impl<T: ?Sized> SpinMutex<T> {
    /// Locks the [`SpinMutex`] and returns a guard that permits access to the
    /// inner data.
    ///
    /// The returned value may be dereferenced for data access
    /// and the lock will be dropped when the guard falls out of scope.
    #[inline]
    #[track_caller]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        #[cfg(all(debug_assertions, not(test)))]
        let mut spins = 0usize;
        #[cfg(test)]
        let begin = std::time::Instant::now();
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }

            while self.is_locked() {
                core::hint::spin_loop();
                #[cfg(all(debug_assertions, not(test)))]
                {
                    spins += 1;
                    if spins >= DEADLOCK_SPINS {
                        panic!("deadlock detected");
                    }
                }
                #[cfg(test)]
                if begin.elapsed().as_millis() >= 2000 {
                    panic!("deadlock detected");
                }
            }
        }
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// # Safety
    ///
    /// This function provides no synchronization guarantees and so its result
    /// should be considered 'out of date' the instant it is called. Do not
    /// use it for synchronization purposes. However, it may be useful as a
    /// heuristic.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.base.is_locked()
    }

    /// Try to lock this [`SpinMutex`], returning a lock guard if successful.
    #[inline(always)]
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        self.base.try_lock().map(|inner| SpinMutexGuard { inner })
    }

    /// 独占借用时无需加锁
    #[inline(always)]
    pub fn get_mut(&mut self) -> &mut T {
        self.base.get_mut()
    }
}

impl<T: Default> Default for SpinMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // We know statically that only we are referencing data
        &self.inner
    }
}

impl<T: ?Sized> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{mpsc::channel, Arc},
        thread,
    };

    type SpinMutex<T> = super::SpinMutex<T>;

    #[test]
    fn smoke() {
        let m = SpinMutex::<_>::new(());
        drop(m.lock());
        drop(m.lock());
    }

    #[test]
    fn lots_and_lots() {
        const J: u32 = 1000;
        const K: u32 = 3;

        let counter = Arc::new(SpinMutex::new(0u32));
        let (tx, rx) = channel();
        let mut ts = Vec::new();
        for _ in 0..2 * K {
            let tx = tx.clone();
            let counter = Arc::clone(&counter);
            ts.push(thread::spawn(move || {
                for _ in 0..J {
                    *counter.lock() += 1;
                }
                tx.send(()).unwrap();
            }));
        }

        drop(tx);
        for _ in 0..2 * K {
            rx.recv().unwrap();
        }
        assert_eq!(*counter.lock(), J * K * 2);

        for t in ts {
            t.join().unwrap();
        }
    }

    #[test]
    fn try_lock() {
        let mutex = SpinMutex::<_>::new(42);

        // First lock succeeds
        let a = mutex.try_lock();
        assert_eq!(a.as_ref().map(|r| **r), Some(42));

        // Additional lock fails
        let b = mutex.try_lock();
        assert!(b.is_none());
        assert!(mutex.is_locked());

        // After dropping lock, it succeeds again
        drop(a);
        let c = mutex.try_lock();
        assert_eq!(c.as_ref().map(|r| **r), Some(42));
    }

    #[test]
    fn test_mutex_unsized() {
        let mutex: &SpinMutex<[i32]> = &SpinMutex::<_>::new([1, 2, 3]);
        {
            let b = &mut *mutex.lock();
            b[0] = 4;
            b[2] = 5;
        }
        let comp: &[i32] = &[4, 2, 5];
        assert_eq!(&*mutex.lock(), comp);
    }

    #[test]
    fn into_inner_and_get_mut() {
        let mut mutex = SpinMutex::new(1);
        *mutex.get_mut() += 1;
        assert_eq!(mutex.into_inner(), 2);
    }
}
