//! Sink that records the tags it sees.

use std::mem::size_of;
use std::sync::{Arc, Mutex};

use bytemuck::Pod;
use corriente_core::{Block, IoSignature, Tag, WorkError, WorkIo};

/// Shared handle onto the tags a [`TagDebug`] sink has observed.
pub struct TagDebugHandle {
    inner: Arc<Mutex<Vec<Tag>>>,
}

impl Clone for TagDebugHandle {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl TagDebugHandle {
    /// Snapshot of every tag observed so far, in stream order.
    pub fn tags(&self) -> Vec<Tag> {
        self.inner.lock().expect("tag record poisoned").clone()
    }
}

/// Consumes a stream and records every tag that rides on it, logging each
/// one as it passes.
pub struct TagDebug<T> {
    inner: Arc<Mutex<Vec<Tag>>>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Pod> TagDebug<T> {
    /// Creates the sink and the handle used to inspect observed tags.
    pub fn new() -> (Self, TagDebugHandle) {
        let inner = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner: Arc::clone(&inner),
                _marker: std::marker::PhantomData,
            },
            TagDebugHandle { inner },
        )
    }
}

impl<T: Pod + Send> Block for TagDebug<T> {
    fn name(&self) -> &str {
        "tag_debug"
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::fixed(1, size_of::<T>())
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::none()
    }

    fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError> {
        let n = io.inputs[0].items();
        if n > 0 {
            let seen = io.inputs[0].tags();
            if !seen.is_empty() {
                let mut record = self.inner.lock().expect("tag record poisoned");
                for tag in seen {
                    tracing::debug!(offset = tag.offset, key = %tag.key, src = %tag.src, "tag");
                    record.push(tag.clone());
                }
            }
            io.inputs[0].consume(n);
        }
        Ok(())
    }
}
