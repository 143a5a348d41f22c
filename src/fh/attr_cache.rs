//! Attribute cache: a single shared "most recent stat" slot, piggybacked
//! onto encode/decode so a calling PROC can build a `post_op_attr` without
//! a second metadata syscall.
//!
//! §4.8: every path-producing core operation leaves this slot consistent
//! with what it just observed, or explicitly invalid on any failure path.
//! Consumers must peek immediately after the call that populated it.

/// The last stat observed by a core operation, or nothing.
#[derive(Default)]
pub struct AttrCache {
    slot: Option<std::fs::Metadata>,
}

impl AttrCache {
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// Records a freshly observed stat as the most recent one.
    pub fn set(&mut self, meta: std::fs::Metadata) {
        self.slot = Some(meta);
    }

    /// Marks the slot invalid, e.g. after a failed operation.
    pub fn invalidate(&mut self) {
        self.slot = None;
    }

    /// Returns the last observed stat, if any. Callers must peek
    /// immediately after the call that populated it -- a later core call
    /// may overwrite or invalidate the slot.
    pub fn peek(&self) -> Option<&std::fs::Metadata> {
        self.slot.as_ref()
    }
}
