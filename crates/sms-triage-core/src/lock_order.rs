//! Ranked locks with debug-build order checks.
//!
//! Every lock in the workspace has a [`LockLevel`]. The nestings that occur:
//!
//! - a store mutation holds its snapshot lock (`StoreRecords` or
//!   `StoreAllowList`) while it goes through the persistence medium
//!   (`MediumMemory`);
//! - relay workers dequeue under `RelayServerJobs` / `RelayOutboxJobs` and
//!   release it before the pipeline touches any store lock;
//! - the pipeline checks the allow-list and releases it before inserting.
//!
//! A thread holding locks may only take a lock of strictly higher rank. The
//! checks compile away without `debug_assertions`.

#![forbid(unsafe_code)]

#[cfg(debug_assertions)]
use std::cell::RefCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lock hierarchy, lowest rank first.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockLevel {
    /// Relay server connection queue receiver.
    RelayServerJobs,
    /// Relay outbox request queue receiver.
    RelayOutboxJobs,
    /// Record store snapshot.
    StoreRecords,
    /// Allow-list cached entries.
    StoreAllowList,
    /// In-memory medium map; always innermost.
    MediumMemory,
}

impl LockLevel {
    #[must_use]
    pub const fn rank(self) -> u16 {
        match self {
            Self::RelayServerJobs => 10,
            Self::RelayOutboxJobs => 11,
            Self::StoreRecords => 20,
            Self::StoreAllowList => 21,
            Self::MediumMemory => 30,
        }
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}@{}", self.rank())
    }
}

#[cfg(debug_assertions)]
thread_local! {
    static HELD: RefCell<Vec<LockLevel>> = const { RefCell::new(Vec::new()) };
}

/// Panics (debug builds) if `level` may not be taken on this thread now.
#[inline]
fn assert_may_take(level: LockLevel) {
    #[cfg(debug_assertions)]
    HELD.with(|held| {
        let held = held.borrow();
        if let Some(&innermost) = held.last() {
            assert!(
                level.rank() > innermost.rank(),
                "lock order violation: taking {level} while holding {innermost} (held {:?})",
                held.as_slice()
            );
        }
    });
    #[cfg(not(debug_assertions))]
    let _ = level;
}

#[inline]
fn push_held(level: LockLevel) {
    #[cfg(debug_assertions)]
    HELD.with(|held| held.borrow_mut().push(level));
    #[cfg(not(debug_assertions))]
    let _ = level;
}

#[inline]
fn pop_held(level: LockLevel) {
    #[cfg(debug_assertions)]
    HELD.with(|held| {
        let popped = held.borrow_mut().pop();
        assert_eq!(popped, Some(level), "lock release out of order");
    });
    #[cfg(not(debug_assertions))]
    let _ = level;
}

/// Levels held by the current thread, outermost first. Empty in release
/// builds.
#[must_use]
pub fn held_levels() -> Vec<LockLevel> {
    #[cfg(debug_assertions)]
    {
        HELD.with(|held| held.borrow().clone())
    }
    #[cfg(not(debug_assertions))]
    {
        Vec::new()
    }
}

/// A std guard tagged with its level; popping the level on drop.
pub struct LevelGuard<G> {
    level: LockLevel,
    inner: G,
}

impl<G> LevelGuard<G> {
    fn enter(level: LockLevel, take: impl FnOnce() -> G) -> Self {
        assert_may_take(level);
        let inner = take();
        push_held(level);
        Self { level, inner }
    }

    #[must_use]
    pub const fn level(&self) -> LockLevel {
        self.level
    }
}

impl<G> Drop for LevelGuard<G> {
    fn drop(&mut self) {
        pop_held(self.level);
    }
}

impl<G: Deref> Deref for LevelGuard<G> {
    type Target = G::Target;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<G: DerefMut> DerefMut for LevelGuard<G> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

pub type OrderedMutexGuard<'a, T> = LevelGuard<MutexGuard<'a, T>>;
pub type OrderedRwLockReadGuard<'a, T> = LevelGuard<RwLockReadGuard<'a, T>>;
pub type OrderedRwLockWriteGuard<'a, T> = LevelGuard<RwLockWriteGuard<'a, T>>;

/// `Mutex` at a fixed level. Poisoning is ignored.
#[derive(Debug)]
pub struct OrderedMutex<T> {
    level: LockLevel,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    #[must_use]
    pub const fn new(level: LockLevel, value: T) -> Self {
        Self {
            level,
            inner: Mutex::new(value),
        }
    }

    #[must_use]
    pub const fn level(&self) -> LockLevel {
        self.level
    }

    pub fn lock(&self) -> OrderedMutexGuard<'_, T> {
        LevelGuard::enter(self.level, || {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        })
    }

    /// `None` when another thread holds the lock.
    pub fn try_lock(&self) -> Option<OrderedMutexGuard<'_, T>> {
        assert_may_take(self.level);
        let inner = self.inner.try_lock().ok()?;
        push_held(self.level);
        Some(LevelGuard {
            level: self.level,
            inner,
        })
    }
}

/// `RwLock` at a fixed level.
#[derive(Debug)]
pub struct OrderedRwLock<T> {
    level: LockLevel,
    inner: RwLock<T>,
}

impl<T> OrderedRwLock<T> {
    #[must_use]
    pub const fn new(level: LockLevel, value: T) -> Self {
        Self {
            level,
            inner: RwLock::new(value),
        }
    }

    #[must_use]
    pub const fn level(&self) -> LockLevel {
        self.level
    }

    pub fn read(&self) -> OrderedRwLockReadGuard<'_, T> {
        LevelGuard::enter(self.level, || {
            self.inner.read().unwrap_or_else(PoisonError::into_inner)
        })
    }

    pub fn write(&self) -> OrderedRwLockWriteGuard<'_, T> {
        LevelGuard::enter(self.level, || {
            self.inner.write().unwrap_or_else(PoisonError::into_inner)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn store_mutation_goes_through_medium() {
        let records = OrderedRwLock::new(LockLevel::StoreRecords, Vec::<u32>::new());
        let medium = OrderedMutex::new(LockLevel::MediumMemory, vec![7_u32]);

        let mut snapshot = records.write();
        let persisted = {
            let mut map = medium.lock();
            map.push(8);
            map.clone()
        };
        *snapshot = persisted;
        assert_eq!(held_levels(), vec![LockLevel::StoreRecords]);
        drop(snapshot);
        assert!(held_levels().is_empty());
        assert_eq!(*records.read(), vec![7, 8]);
    }

    #[test]
    fn allow_list_reload_goes_through_medium() {
        let entries = OrderedRwLock::new(LockLevel::StoreAllowList, 0_usize);
        let medium = OrderedMutex::new(LockLevel::MediumMemory, 3_usize);
        let mut cached = entries.write();
        *cached = *medium.lock();
        assert_eq!(*cached, 3);
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn medium_before_store_panics() {
        let medium = OrderedMutex::new(LockLevel::MediumMemory, ());
        let records = OrderedRwLock::new(LockLevel::StoreRecords, ());
        let _medium = medium.lock();
        let _records = records.read();
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn insert_while_holding_allow_list_panics() {
        let entries = OrderedRwLock::new(LockLevel::StoreAllowList, ());
        let records = OrderedRwLock::new(LockLevel::StoreRecords, ());
        let _entries = entries.read();
        let _records = records.write();
    }

    #[test]
    fn allow_check_then_insert_is_sequential() {
        let entries = OrderedRwLock::new(LockLevel::StoreAllowList, 1_u32);
        let records = OrderedRwLock::new(LockLevel::StoreRecords, 2_u32);
        let seen = *entries.read();
        *records.write() += seen;
        assert_eq!(*records.read(), 3);
    }

    #[test]
    fn try_lock_reports_contention() {
        let jobs = OrderedMutex::new(LockLevel::RelayServerJobs, ());
        let guard = jobs.lock();
        let contended = thread::scope(|s| s.spawn(|| jobs.try_lock().is_none()).join());
        drop(guard);
        assert!(contended.expect("thread panicked"));
        assert!(jobs.try_lock().is_some());
        assert!(held_levels().is_empty());
    }

    /// Workers drain a shared receiver, then write through store and medium,
    /// the way relay workers run requests.
    #[test]
    fn relay_workers_dequeue_then_store() {
        let (tx, rx) = mpsc::sync_channel::<u32>(4);
        let jobs = Arc::new(OrderedMutex::new(LockLevel::RelayServerJobs, rx));
        let records = Arc::new(OrderedRwLock::new(LockLevel::StoreRecords, 0_u32));
        let medium = Arc::new(OrderedMutex::new(LockLevel::MediumMemory, 0_u32));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let jobs = Arc::clone(&jobs);
                let records = Arc::clone(&records);
                let medium = Arc::clone(&medium);
                thread::spawn(move || {
                    loop {
                        let job = jobs.lock().recv();
                        let Ok(n) = job else {
                            break;
                        };
                        assert!(held_levels().is_empty());
                        let mut snapshot = records.write();
                        let mut persisted = medium.lock();
                        *persisted += n;
                        *snapshot = *persisted;
                    }
                })
            })
            .collect();
        for n in 1..=100 {
            tx.send(n).expect("workers alive");
        }
        drop(tx);
        for worker in workers {
            worker.join().expect("worker panicked");
        }
        assert_eq!(*records.read(), 5050);
    }
}
