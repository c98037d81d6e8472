//! Sink that discards everything.

use std::mem::size_of;

use bytemuck::Pod;
use corriente_core::{Block, IoSignature, WorkError, WorkIo};

/// Consumes and discards all input.
pub struct NullSink<T> {
    _marker: std::marker::PhantomData<T>,
}

impl<T> NullSink<T> {
    /// A discarding sink.
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for NullSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Pod + Send> Block for NullSink<T> {
    fn name(&self) -> &str {
        "null_sink"
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::fixed(1, size_of::<T>())
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::none()
    }

    fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError> {
        let n = io.inputs[0].items();
        io.inputs[0].consume(n);
        Ok(())
    }
}
