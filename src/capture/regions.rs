//! Dirty and moved region bookkeeping for one duplication

use log::debug;

use crate::capture::traits::{BufferQuery, OutputDuplication};
use crate::error::{hresult, PlatformError, PlatformResult};
use crate::types::{MoveRect, Rectangle};

const INITIAL_DIRTY_CAPACITY: usize = 32;
const INITIAL_MOVED_CAPACITY: usize = 8;

/// Reusable scratch buffers for per-frame region metadata.
///
/// Buffers grow to whatever the duplication asks for and never shrink.
#[derive(Debug)]
pub struct FrameRegions {
    dirty: Vec<Rectangle>,
    moved: Vec<MoveRect>,
    dirty_len: usize,
    moved_len: usize,
}

impl FrameRegions {
    pub fn new() -> Self {
        Self {
            dirty: vec![Rectangle::default(); INITIAL_DIRTY_CAPACITY],
            moved: vec![MoveRect::default(); INITIAL_MOVED_CAPACITY],
            dirty_len: 0,
            moved_len: 0,
        }
    }

    /// Fetch moved then dirty rects for the currently held frame.
    pub fn fetch<T: OutputDuplication>(&mut self, duplication: &mut T) -> PlatformResult<()> {
        self.clear();
        self.moved_len = fill_with_retry(&mut self.moved, "GetFrameMoveRects", |buf| {
            duplication.frame_move_rects(buf)
        })?;
        self.dirty_len = fill_with_retry(&mut self.dirty, "GetFrameDirtyRects", |buf| {
            duplication.frame_dirty_rects(buf)
        })?;
        debug!(
            "frame metadata: {} dirty, {} moved",
            self.dirty_len, self.moved_len
        );
        Ok(())
    }

    pub fn clear(&mut self) {
        self.dirty_len = 0;
        self.moved_len = 0;
    }

    pub fn dirty(&self) -> &[Rectangle] {
        &self.dirty[..self.dirty_len]
    }

    pub fn moved(&self) -> &[MoveRect] {
        &self.moved[..self.moved_len]
    }

    /// Current scratch capacity as (dirty, moved)
    pub fn capacity(&self) -> (usize, usize) {
        (self.dirty.len(), self.moved.len())
    }
}

impl Default for FrameRegions {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a size-negotiating query, growing `buffer` and retrying once if the
/// platform reports it too small.
pub(crate) fn fill_with_retry<E, T, F>(
    buffer: &mut Vec<E>,
    context: &str,
    mut query: F,
) -> PlatformResult<T>
where
    E: Clone + Default,
    T: Clamp,
    F: FnMut(&mut [E]) -> PlatformResult<BufferQuery<T>>,
{
    let required = match query(buffer)? {
        BufferQuery::Filled(value) => return Ok(value.clamp_to(buffer.len())),
        BufferQuery::TooSmall { required } => required,
    };

    if required <= buffer.len() {
        return Err(PlatformError::new(hresult::DXGI_ERROR_MORE_DATA, context));
    }
    debug!("{}: growing buffer {} -> {}", context, buffer.len(), required);
    buffer.resize(required, E::default());

    match query(buffer)? {
        BufferQuery::Filled(value) => Ok(value.clamp_to(buffer.len())),
        BufferQuery::TooSmall { .. } => Err(PlatformError::new(hresult::DXGI_ERROR_MORE_DATA, context)),
    }
}

/// Keeps a reported element count within the buffer that was filled.
pub(crate) trait Clamp {
    fn clamp_to(self, len: usize) -> Self;
}

impl Clamp for usize {
    fn clamp_to(self, len: usize) -> Self {
        self.min(len)
    }
}

impl Clamp for crate::types::PointerShapeInfo {
    fn clamp_to(self, _len: usize) -> Self {
        self
    }
}
