//! The load protocol shared by every structure of an image.
//!
//! Structures are loaded in file order from a shared [`LoadContext`]. Each one either consumes
//! its bytes from the front of the context's remaining data or records why it could not. A
//! failure clears the context's continuation flag; everything loaded after that point reports
//! [`LoadState::NotExist`] instead of trying to parse garbage.


use tracing::trace;

use crate::address::FileOffset;
use crate::segment::Segment;


#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LoadState {
    /// Validation failed: bad signature, too few bytes, or a count over its ceiling.
    Error,

    /// Not loaded yet.
    #[default]
    NotLoaded,

    /// Legitimately absent, or a predecessor failed.
    NotExist,

    /// The structure itself parsed, but a nested structure did not.
    PartlyLoaded,

    Loaded,
}
impl LoadState {
    /// Whether the structure has bytes behind it.
    pub fn is_loaded(self) -> bool {
        matches!(self, Self::Loaded | Self::PartlyLoaded)
    }
}

/// How a structure's byte range changed in the most recent load.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LoadDiff {
    #[default]
    None,

    /// Was empty, now has bytes.
    Added,

    /// Had bytes, now empty.
    Deleted,

    /// Had bytes, still has bytes, but at a different offset or with a different length.
    Moved,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LoadResult {
    pub state: LoadState,
    pub diff: LoadDiff,
}


/// The cursor threaded through a load.
#[derive(Clone, Debug)]
pub(crate) struct LoadContext {
    /// The bytes not consumed yet.
    pub data: Segment,

    /// Cleared as soon as a structure fails; later structures become `NotExist`.
    pub next: bool,

    /// A state the next structure to load takes on instead of parsing. Only
    /// [`LoadState::Error`] is supported.
    pub set_state_once: Option<LoadState>,
}
impl LoadContext {
    pub fn new(data: Segment) -> Self {
        Self {
            data,
            next: true,
            set_state_once: None,
        }
    }

    /// A context in which the structure loaded next does not exist.
    pub fn not_exist() -> Self {
        Self {
            data: Segment::default(),
            next: false,
            set_state_once: None,
        }
    }

    /// A context in which the structure loaded next fails.
    pub fn forced_error() -> Self {
        Self {
            data: Segment::default(),
            next: true,
            set_state_once: Some(LoadState::Error),
        }
    }

    /// Number of bytes consumed since `start` was taken.
    pub fn consumed_since(&self, start: &Segment) -> usize {
        self.data.index().saturating_sub(start.index())
    }
}


/// The byte range of a structure together with the outcome of its last load.
#[derive(Clone, Debug, Default)]
pub struct Span {
    data: Segment,
    load_result: LoadResult,
}
impl Span {
    pub fn raw_data(&self) -> &Segment { &self.data }
    pub fn load_result(&self) -> LoadResult { self.load_result }
    pub fn state(&self) -> LoadState { self.load_result.state }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    pub fn start_offset(&self) -> FileOffset {
        FileOffset(self.data.index() as u32)
    }

    pub fn end_offset(&self) -> FileOffset {
        FileOffset((self.data.index() + self.data.len()) as u32)
    }

    /// Handles the states that end a load before any parsing. Returns whether to go on.
    pub(crate) fn pre_load(&mut self, context: &mut LoadContext) -> bool {
        if !context.next {
            self.set_not_exist();
            return false;
        }
        if let Some(state) = context.set_state_once.take() {
            debug_assert_eq!(state, LoadState::Error);
            self.set_error(&mut context.next);
            return false;
        }
        true
    }

    pub(crate) fn set_error(&mut self, next: &mut bool) {
        self.set_empty(LoadState::Error);
        *next = false;
    }

    pub(crate) fn set_not_exist(&mut self) {
        self.set_empty(LoadState::NotExist);
    }

    fn set_empty(&mut self, state: LoadState) {
        let diff = if self.data.is_empty() { LoadDiff::None } else { LoadDiff::Deleted };
        self.data = Segment::default();
        self.load_result = LoadResult { state, diff };
    }

    /// Takes the first `length` bytes of the context's data and advances past them.
    pub(crate) fn set_loaded(&mut self, context: &mut LoadContext, length: usize, partly: bool) {
        let start = context.data.clone();
        let old = self.data.clone();
        self.commit(context, &start, &old, length, partly);
    }

    /// Takes `length` bytes starting at `start`, comparing against the range held before the
    /// load began, and moves the context's data to just behind them.
    ///
    /// Composite structures call this after their children have loaded, with the data and range
    /// they saw on entry.
    pub(crate) fn commit(&mut self, context: &mut LoadContext, start: &Segment, old: &Segment, length: usize, partly: bool) {
        let diff = match (old.is_empty(), length == 0) {
            (true, true) => LoadDiff::None,
            (true, false) => LoadDiff::Added,
            (false, true) => LoadDiff::Deleted,
            (false, false) => {
                if old.index() == start.index() && old.len() == length {
                    LoadDiff::None
                } else {
                    LoadDiff::Moved
                }
            },
        };
        self.data = start.slice_len(0, length);
        context.data = start.slice(length);
        let state = if partly { LoadState::PartlyLoaded } else { LoadState::Loaded };
        trace!("loaded {:#X} bytes at {:#X} ({:?}, {:?})", length, start.index(), state, diff);
        self.load_result = LoadResult { state, diff };
    }

    pub(crate) fn read<T: crate::from_byte_slice::FromByteSlice>(&self, offset: usize) -> T {
        assert!(!self.data.is_empty(), "structure has no data (state {:?})", self.load_result.state);
        self.data.read(offset)
    }

    pub(crate) fn try_read<T: crate::from_byte_slice::FromByteSlice>(&self, offset: usize) -> Option<T> {
        self.data.try_read(offset)
    }

    pub(crate) fn write<T: crate::from_byte_slice::FromByteSlice>(&mut self, offset: usize, value: T) {
        assert!(!self.data.is_empty(), "structure has no data (state {:?})", self.load_result.state);
        self.data.write(offset, value)
    }
}


/// A node of the image's structure tree.
pub trait Structure {
    fn span(&self) -> &Span;

    fn load_result(&self) -> LoadResult { self.span().load_result() }
    fn state(&self) -> LoadState { self.span().state() }

    /// The bytes of the structure; empty unless loaded.
    fn raw_data(&self) -> &Segment { self.span().raw_data() }
    fn is_empty(&self) -> bool { self.span().is_empty() }
    fn start_offset(&self) -> FileOffset { self.span().start_offset() }
    fn end_offset(&self) -> FileOffset { self.span().end_offset() }
}
impl Structure for Span {
    fn span(&self) -> &Span { self }
}
