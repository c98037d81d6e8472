//! Sink that collects everything it receives.

use std::mem::size_of;
use std::sync::{Arc, Mutex};

use bytemuck::Pod;
use corriente_core::{Block, IoSignature, Tag, WorkError, WorkIo};

struct Collected<T> {
    data: Vec<T>,
    tags: Vec<Tag>,
}

/// Shared handle onto a [`VectorSink`]'s collected items, usable while the
/// flow graph runs and after it finishes.
pub struct SinkHandle<T> {
    inner: Arc<Mutex<Collected<T>>>,
}

impl<T> Clone for SinkHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> SinkHandle<T> {
    /// Snapshot of the items received so far.
    pub fn data(&self) -> Vec<T> {
        self.inner.lock().expect("sink poisoned").data.clone()
    }

    /// Snapshot of the tags received so far, in stream order.
    pub fn tags(&self) -> Vec<Tag> {
        self.inner.lock().expect("sink poisoned").tags.clone()
    }

    /// Items received so far.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("sink poisoned").data.len()
    }

    /// True when nothing has arrived yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Appends every received item and tag to a shared vector.
pub struct VectorSink<T> {
    inner: Arc<Mutex<Collected<T>>>,
}

impl<T: Pod> VectorSink<T> {
    /// Creates the sink and the handle used to read it out.
    pub fn new() -> (Self, SinkHandle<T>) {
        let inner = Arc::new(Mutex::new(Collected {
            data: Vec::new(),
            tags: Vec::new(),
        }));
        (
            Self {
                inner: Arc::clone(&inner),
            },
            SinkHandle { inner },
        )
    }
}

impl<T: Pod + Send> Block for VectorSink<T> {
    fn name(&self) -> &str {
        "vector_sink"
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
            let mut collected = self.inner.lock().expect("sink poisoned");
            collected.data.extend_from_slice(io.inputs[0].slice::<T>());
            collected.tags.extend_from_slice(io.inputs[0].tags());
            io.inputs[0].consume(n);
        }
        Ok(())
    }
}
