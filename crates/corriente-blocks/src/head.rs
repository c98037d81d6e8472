//! Pass the first N items, then finish the stream.

use std::mem::size_of;

use bytemuck::Pod;
use corriente_core::{Block, IoSignature, WorkError, WorkIo};

/// Copies the first `count` items through, then declares end-of-stream.
///
/// The canonical way to run a graph with infinite sources for a bounded
/// number of items.
pub struct Head<T> {
    remaining: u64,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Head<T> {
    /// A head block passing `count` items.
    pub fn new(count: u64) -> Self {
        Self {
            remaining: count,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Pod + Send> Block for Head<T> {
    fn name(&self) -> &str {
        "head"
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::fixed(1, size_of::<T>())
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::fixed(1, size_of::<T>())
    }

    fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError> {
        let n = io.inputs[0]
            .items()
            .min(io.outputs[0].capacity())
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));

        let src = io.inputs[0].slice::<T>();
        io.outputs[0].slice_mut::<T>()[..n].copy_from_slice(&src[..n]);
        io.inputs[0].consume(n);
        io.outputs[0].produce(n);
        self.remaining -= n as u64;

        if self.remaining == 0 {
            io.finished = true;
        }
        Ok(())
    }
}
