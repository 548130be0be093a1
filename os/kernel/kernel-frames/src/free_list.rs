//! Index-based LIFO list of free frames.
//!
//! Instead of threading the links through the free frames themselves, each
//! frame number owns one slot of a side table:
//!
//! ```text
//!  head ─► 7        links[7] = 3
//!          │        links[3] = 5
//!          ▼        links[5] = END
//!          3 ─► 5 ─► END      every other slot = DETACHED
//! ```
//!
//! A slot is [`DETACHED`] exactly when its frame is not on the list, which
//! makes membership an O(1) check and lets [`FreeList::push`] refuse to
//! link a frame twice.

use crate::addr::FrameNumber;
use crate::error::FrameError;

/// Slot value of a frame that is not on the list.
const DETACHED: u32 = u32::MAX;

/// Link value terminating the list.
const END: u32 = u32::MAX - 1;

/// Largest number of frames a link table may describe.
pub const MAX_FRAMES: usize = END as usize;

pub struct FreeList<'a> {
    links: &'a mut [u32],
    head: u32,
    len: usize,
}

impl<'a> FreeList<'a> {
    /// An empty list over `links`, which must not exceed [`MAX_FRAMES`] slots.
    pub fn new(links: &'a mut [u32]) -> Self {
        debug_assert!(links.len() <= MAX_FRAMES);
        links.fill(DETACHED);
        Self {
            links,
            head: END,
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `frame` is currently linked.
    #[inline]
    #[must_use]
    pub fn contains(&self, frame: FrameNumber) -> bool {
        self.links
            .get(frame.index())
            .is_some_and(|&link| link != DETACHED)
    }

    /// Link `frame` in as the new head.
    ///
    /// # Errors
    /// [`FrameError::DoubleFree`] if `frame` is already on the list.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, frame: FrameNumber) -> Result<(), FrameError> {
        let slot = &mut self.links[frame.index()];
        if *slot != DETACHED {
            return Err(FrameError::DoubleFree { frame });
        }
        *slot = self.head;
        // `new` bounds the table by MAX_FRAMES, so every index fits below END.
        self.head = frame.index() as u32;
        self.len += 1;
        Ok(())
    }

    /// Unlink and return the most recently pushed frame.
    pub fn pop(&mut self) -> Option<FrameNumber> {
        if self.head == END {
            return None;
        }
        let frame = FrameNumber::new(self.head as usize);
        let slot = &mut self.links[frame.index()];
        self.head = core::mem::replace(slot, DETACHED);
        self.len -= 1;
        Some(frame)
    }

    /// Walk the list from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = FrameNumber> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            if cursor == END {
                return None;
            }
            let frame = FrameNumber::new(cursor as usize);
            cursor = self.links[frame.index()];
            Some(frame)
        })
    }
}
