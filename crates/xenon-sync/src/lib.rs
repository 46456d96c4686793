//! The synchronization primitives of the runtime.
//!
//! The collector is stop-the-world, which shapes the locking: the page
//! allocator sits behind a [`Spinlock`] that mutators hold for a page grab
//! and the collector holds for an entire cycle, so the lock is either
//! uncontended or held for a span where blocking mutators is the point. A
//! sleeping mutex would buy nothing over spinning here. [`Once`] backs the
//! one-shot process startup.
//!
//! Both are `spin` types today; funneling them through these aliases keeps
//! the runtime free to swap in a futex-based lock later without touching
//! any call site.
#![no_std]

/// The lock guarding the page allocator, the root set and the thread
/// registry.
pub type Spinlock<T> = spin::Mutex<T>;

/// The guard of a [`Spinlock`]; the collector keeps one alive for a whole
/// cycle to freeze the page set.
pub type SpinlockGuard<'a, T> = spin::MutexGuard<'a, T>;

/// One-shot initialization, used for process startup.
pub type Once<T = ()> = spin::Once<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinlock_round_trip() {
        let lock = Spinlock::new(7u32);
        {
            let mut guard: SpinlockGuard<'_, u32> = lock.lock();
            *guard += 1;
        }
        assert_eq!(*lock.lock(), 8);
    }

    #[test]
    fn once_runs_a_single_time() {
        let once: Once<u32> = Once::new();
        assert_eq!(*once.call_once(|| 1), 1);
        assert_eq!(*once.call_once(|| 2), 1);
    }
}
