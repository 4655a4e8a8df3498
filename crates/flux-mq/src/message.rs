//! Message descriptor (spec §3 "Message descriptor", §6).

use std::sync::Arc;

use flux_utils::ArrayVec;

/// Frames up to this size are stored inline; larger payloads are moved into
/// a refcounted heap buffer instead of being copied through the pipe.
pub const INLINE_CAP: usize = 32;

/// Set by the sender on every non-final frame of a multi-part message.
pub const MORE: u8 = 0b0000_0001;

#[derive(Clone, Debug)]
enum Content {
    /// End-of-stream sentinel. Never visible to API callers — the reader
    /// intercepts it and converts it into a termination event.
    Delimiter,
    Inline(ArrayVec<u8, INLINE_CAP>),
    Shared(Arc<[u8]>),
}

/// An opaque, movable message descriptor. Messages are moved, never copied,
/// across pipe boundaries — `Msg` is `Clone` only because the writer's
/// `rollback` needs to move a frame back into the queue after inspecting it,
/// not because callers are expected to duplicate messages.
#[derive(Clone, Debug)]
pub struct Msg {
    content: Content,
    flags: u8,
}

impl Msg {
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        let content = if bytes.len() <= INLINE_CAP {
            Content::Inline(bytes.iter().copied().collect())
        } else {
            Content::Shared(Arc::from(bytes))
        };
        Self { content, flags: 0 }
    }

    #[must_use]
    pub fn from_shared(bytes: Arc<[u8]>) -> Self {
        Self { content: Content::Shared(bytes), flags: 0 }
    }

    #[must_use]
    pub fn delimiter() -> Self {
        Self { content: Content::Delimiter, flags: 0 }
    }

    #[must_use]
    pub const fn is_delimiter(&self) -> bool {
        matches!(self.content, Content::Delimiter)
    }

    pub fn set_more(&mut self, more: bool) {
        if more {
            self.flags |= MORE;
        } else {
            self.flags &= !MORE;
        }
    }

    #[must_use]
    pub const fn is_more(&self) -> bool {
        self.flags & MORE != 0
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        match &self.content {
            Content::Delimiter => &[],
            Content::Inline(v) => v.as_slice(),
            Content::Shared(b) => b,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data().len()
    }
}
