//! # Kernel synchronization primitives
//!
//! Only what the memory subsystem needs: a named spin lock whose guard
//! releases on drop. Locks are identified by name in diagnostics so that a
//! report can point at the lock whose discipline was violated.
//!
//! ```
//! use kernel_sync::SpinLock;
//!
//! static COUNTER: SpinLock<u64> = SpinLock::new("counter", 0);
//!
//! COUNTER.with_lock(|c| *c += 1);
//! assert_eq!(*COUNTER.lock(), 1);
//! assert!(!COUNTER.is_locked());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
