//! Source of zero-valued items, forever.

use std::mem::size_of;

use bytemuck::Pod;
use corriente_core::{Block, IoSignature, WorkError, WorkIo};

/// Produces zeroed items as fast as downstream consumes them. Never
/// finishes on its own; pair with a `Head` or stop the top block.
pub struct NullSource<T> {
    _marker: std::marker::PhantomData<T>,
}

impl<T> NullSource<T> {
    /// A zero source.
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for NullSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pod + Send> Block for NullSource<T> {
    fn name(&self) -> &str {
        "null_source"
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::none()
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::fixed(1, size_of::<T>())
    }

    fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError> {
        // The ring region may hold stale bytes from earlier laps.
        io.outputs[0].bytes_mut().fill(0);
        let n = io.outputs[0].capacity();
        io.outputs[0].produce(n);
        Ok(())
    }
}
