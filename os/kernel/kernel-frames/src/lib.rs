//! # Physical Frame Allocation and Sharing
//!
//! This crate owns physical memory at frame granularity (4 KiB). It hands out
//! frames for process memory, kernel stacks, page tables and pipe buffers, and
//! it counts the owners of every frame so that a frame shared between address
//! spaces (copy-on-write after fork) returns to the pool only when its last
//! owner releases it.
//!
//! ## Components
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ FrameAllocator (frame_alloc)                         │
//! │   allocate_frame · share_frame · release_frame       │
//! │   reference_count · range initializer                │
//! └───────────┬───────────────────────────┬──────────────┘
//!             │ lock 1                    │ lock 2
//! ┌───────────▼────────────┐   ┌──────────▼───────────────┐
//! │ FreeList (free_list)   │   │ FrameRefTable (refcount) │
//! │  LIFO of frame numbers │   │  one count per frame     │
//! └────────────────────────┘   └──────────────────────────┘
//! ```
//!
//! Frame contents are only touched through [`FrameMemory`] to write fill
//! patterns; the bookkeeping lives in caller-supplied side tables, so the
//! crate needs neither a heap nor raw pointers into free frames.
//!
//! ## Frame life cycle
//!
//! ```text
//! Untracked ──seed──► Free ──allocate──► Owned(1) ──share──► Shared(n)
//!                      ▲                    │                    │
//!                      └──────release───────┘◄─────release───────┘
//! ```
//!
//! ## Usage
//!
//! ```
//! use kernel_frames::{
//!     FRAME_SIZE, FrameAllocator, FrameMemory, PhysAddr, Release, StaticFrameTables,
//! };
//!
//! struct NoPoison;
//! impl FrameMemory for NoPoison {
//!     fn fill(&self, _frame: PhysAddr, _byte: u8) {}
//! }
//!
//! let mut storage = StaticFrameTables::<32>::new();
//! let frames = FrameAllocator::new(
//!     storage.tables(),
//!     NoPoison,
//!     PhysAddr::new(0x1_0123),
//!     PhysAddr::new(0x2_0000),
//! )
//! .unwrap();
//! assert_eq!(frames.managed_frames(), 15);
//!
//! let page = frames.allocate_frame().unwrap();
//! assert_eq!(page.as_u64() % FRAME_SIZE, 0);
//!
//! // fork: the child maps the same frame copy-on-write
//! frames.share_frame(page);
//! assert!(frames.is_shared(page));
//!
//! assert_eq!(frames.release_frame(page), Release::StillShared(1));
//! assert_eq!(frames.release_frame(page), Release::Freed);
//! assert_eq!(frames.free_frames(), 15);
//! ```
//!
//! ## Features
//!
//! * `poison` (default): fill released frames with [`FREE_POISON`] and newly
//!   allocated ones with [`ALLOC_POISON`] to make stale references visible.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod addr;
pub mod error;
pub mod frame_alloc;
pub mod free_list;
pub mod memory;
pub mod refcount;

pub use addr::{FRAME_SHIFT, FRAME_SIZE, FrameNumber, PhysAddr};
pub use error::{FrameError, InvalidFrameReason, OutOfMemory, halt};
pub use frame_alloc::{
    ALLOC_POISON, FREE_POISON, FrameAlloc, FrameAllocator, FrameStats, FrameTables, Release,
    StaticFrameTables,
};
pub use memory::{DirectMap, FrameMemory};
