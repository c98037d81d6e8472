//! Multiply every item by a constant.

use std::mem::size_of;
use std::ops::Mul;

use bytemuck::Pod;
use corriente_core::{Block, IoSignature, WorkError, WorkIo};

/// Synchronous 1:1 gain block: `out[k] = in[k] * constant`.
pub struct MultiplyConst<T> {
    constant: T,
}

impl<T> MultiplyConst<T> {
    /// A gain block with the given constant.
    pub fn new(constant: T) -> Self {
        Self { constant }
    }
}

impl<T: Pod + Send + Mul<Output = T>> Block for MultiplyConst<T> {
    fn name(&self) -> &str {
        "multiply_const"
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::fixed(1, size_of::<T>())
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::fixed(1, size_of::<T>())
    }

    fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError> {
        let n = io.inputs[0].items().min(io.outputs[0].capacity());
        let src = io.inputs[0].slice::<T>();
        for (k, out) in io.outputs[0].slice_mut::<T>()[..n].iter_mut().enumerate() {
            *out = src[k] * self.constant;
        }
        io.inputs[0].consume(n);
        io.outputs[0].produce(n);
        Ok(())
    }
}
