#![forbid(unsafe_code)]

//! Owning aggregate for streams that must be torn down together, without
//! touching the upstream nodes they hang off.

use std::cell::RefCell;
use std::fmt;
use std::mem;

use tracing::debug;

use crate::stream::{NodeRef, Stream};

/// Tracks the streams of one branch and disposes exactly those.
///
/// Unlike [`Stream::terminate`], disposal does not follow `source` pointers,
/// so sibling branches sharing an upstream keep running. Dropping the
/// pipeline disposes it.
#[derive(Default)]
pub struct Pipeline {
    nodes: RefCell<Vec<NodeRef>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `stream` and hand it back for further chaining.
    pub fn track<T: Clone + 'static>(&self, stream: Stream<T>) -> Stream<T> {
        self.nodes.borrow_mut().push(stream.node());
        stream
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Dispose tracked streams, most recently tracked first.
    pub fn dispose(&self) {
        let nodes = mem::take(&mut *self.nodes.borrow_mut());
        if nodes.is_empty() {
            return;
        }
        debug!(nodes = nodes.len(), "pipeline.dispose");
        for node in nodes.iter().rev() {
            node.dispose();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("nodes", &self.len()).finish()
    }
}
