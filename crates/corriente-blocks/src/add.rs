//! N-input synchronous sum.

use std::mem::size_of;

use bytemuck::Pod;
use corriente_core::{Block, IoSignature, WorkError, WorkIo};

/// Adds N input streams element-wise: `out[k] = sum_i in_i[k]`.
///
/// Synchronous: one output item needs one item on every input, so the block
/// advances at the pace of its slowest input.
pub struct Add<T> {
    ninputs: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Add<T> {
    /// A sum block over `ninputs` streams.
    pub fn new(ninputs: usize) -> Self {
        assert!(ninputs >= 1);
        Self {
            ninputs,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Pod + Send + std::ops::Add<Output = T>> Block for Add<T> {
    fn name(&self) -> &str {
        "add"
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::fixed(self.ninputs, size_of::<T>())
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::fixed(1, size_of::<T>())
    }

    fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError> {
        let n = io
            .inputs
            .iter()
            .map(corriente_core::StreamInput::items)
            .min()
            .unwrap_or(0)
            .min(io.outputs[0].capacity());

        let columns: Vec<&[T]> = io.inputs.iter().map(|i| i.slice::<T>()).collect();
        for (k, out) in io.outputs[0].slice_mut::<T>()[..n].iter_mut().enumerate() {
            let mut acc = columns[0][k];
            for column in &columns[1..] {
                acc = acc + column[k];
            }
            *out = acc;
        }

        for input in &mut io.inputs {
            input.consume(n);
        }
        io.outputs[0].produce(n);
        Ok(())
    }
}
