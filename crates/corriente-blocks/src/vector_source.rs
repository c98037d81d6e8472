//! Source that replays a fixed vector of items.

use std::mem::size_of;

use bytemuck::Pod;
use corriente_core::{Block, IoSignature, Value, WorkError, WorkIo};

/// Emits the items of a vector, optionally forever.
///
/// Tags given at construction are pinned to offsets within the vector and
/// emitted on the first pass only; repeats replay the samples, not the tags.
pub struct VectorSource<T> {
    data: Vec<T>,
    repeat: bool,
    tags: Vec<(u64, String, Value)>,
    /// Position within `data` for the next item.
    pos: usize,
    /// Items emitted since stream start.
    emitted: u64,
}

impl<T: Pod> VectorSource<T> {
    /// A source that plays `data` once and then finishes.
    pub fn new(data: Vec<T>) -> Self {
        Self {
            data,
            repeat: false,
            tags: Vec::new(),
            pos: 0,
            emitted: 0,
        }
    }

    /// A source that replays `data` forever (until stopped).
    pub fn repeating(data: Vec<T>) -> Self {
        Self {
            repeat: true,
            ..Self::new(data)
        }
    }

    /// Attaches a tag at `offset` items into the vector.
    #[must_use]
    pub fn with_tag(mut self, offset: u64, key: impl Into<String>, value: Value) -> Self {
        self.tags.push((offset, key.into(), value));
        self
    }
}

impl<T: Pod + Send> Block for VectorSource<T> {
    fn name(&self) -> &str {
        "vector_source"
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::none()
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::fixed(1, size_of::<T>())
    }

    fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError> {
        if self.data.is_empty() {
            io.finished = true;
            return Ok(());
        }

        let out = io.outputs[0].slice_mut::<T>();
        let mut written = 0;
        while written < out.len() {
            if self.pos == self.data.len() {
                if !self.repeat {
                    break;
                }
                self.pos = 0;
            }
            let n = (out.len() - written).min(self.data.len() - self.pos);
            out[written..written + n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            written += n;
        }

        let end = self.emitted + written as u64;
        for (offset, key, value) in &self.tags {
            if *offset >= self.emitted && *offset < end {
                io.outputs[0].add_tag(*offset - self.emitted, key.clone(), value.clone());
            }
        }
        self.emitted = end;

        io.outputs[0].produce(written);
        if !self.repeat && self.pos == self.data.len() {
            io.finished = true;
        }
        Ok(())
    }
}
