#![allow(dead_code)]

use kernel_frames::{FRAME_SIZE, FrameAllocator, FrameMemory, PhysAddr, StaticFrameTables};
use std::sync::Mutex;

/// Host memory standing in for physical RAM starting at `base`.
///
/// Records every fill so tests can tell which frames were poisoned.
pub struct Arena {
    base: u64,
    bytes: Mutex<Vec<u8>>,
    fills: Mutex<Vec<(PhysAddr, u8)>>,
}

impl Arena {
    pub fn new(base: u64, frames: u64) -> Self {
        Self {
            base,
            bytes: Mutex::new(vec![0xAA; (frames * FRAME_SIZE) as usize]),
            fills: Mutex::new(Vec::new()),
        }
    }

    fn offset(&self, frame: PhysAddr) -> usize {
        (frame.as_u64() - self.base) as usize
    }

    /// Contents of the frame at `frame`.
    pub fn frame(&self, frame: PhysAddr) -> Vec<u8> {
        let start = self.offset(frame);
        self.bytes.lock().unwrap()[start..start + FRAME_SIZE as usize].to_vec()
    }

    /// Write to a frame the way an owner would.
    pub fn scribble(&self, frame: PhysAddr, byte: u8) {
        let start = self.offset(frame);
        self.bytes.lock().unwrap()[start..start + FRAME_SIZE as usize].fill(byte);
    }

    pub fn fills_of(&self, frame: PhysAddr) -> Vec<u8> {
        self.fills
            .lock()
            .unwrap()
            .iter()
            .filter(|(pa, _)| *pa == frame)
            .map(|&(_, byte)| byte)
            .collect()
    }

    pub fn clear_fills(&self) {
        self.fills.lock().unwrap().clear();
    }
}

impl FrameMemory for Arena {
    fn fill(&self, frame: PhysAddr, byte: u8) {
        let start = self.offset(frame);
        self.bytes.lock().unwrap()[start..start + FRAME_SIZE as usize].fill(byte);
        self.fills.lock().unwrap().push((frame, byte));
    }
}

/// Frame memory that ignores writes.
pub struct Discard;

impl FrameMemory for Discard {
    fn fill(&self, _frame: PhysAddr, _byte: u8) {}
}

/// Number of table entries the helpers provide.
pub const TABLE: usize = 256;

/// First frame of the managed range used by most tests.
pub const BASE: u64 = 0x40_000;

/// Run `f` against an allocator managing `frames` frames from [`BASE`],
/// backed by an [`Arena`].
pub fn with_arena<R>(frames: u64, f: impl FnOnce(&FrameAllocator<'_, &Arena>, &Arena) -> R) -> R {
    let arena = Arena::new(BASE, frames);
    let mut storage = Box::new(StaticFrameTables::<TABLE>::new());
    let alloc = FrameAllocator::new(
        storage.tables(),
        &arena,
        PhysAddr::new(BASE),
        PhysAddr::new(BASE + frames * FRAME_SIZE),
    )
    .expect("valid range");
    f(&alloc, &arena)
}
