//! Corriente Core - streaming dataflow runtime
//!
//! This crate provides the scheduler and buffer machinery for running
//! directed graphs of signal-processing blocks: each block transforms
//! streams of fixed-size items, connected by single-producer
//! multi-consumer circular buffers, with one executor thread per block.
//!
//! # Core Abstractions
//!
//! ## Blocks
//!
//! - [`Block`] - Object-safe trait every processing block implements
//! - [`IoSignature`] - Port-count and item-size declaration
//! - [`WorkIo`], [`StreamInput`], [`StreamOutput`] - Views handed to
//!   `work()`, with typed access via `bytemuck`
//!
//! ## Buffers
//!
//! - [`StreamBuffer`] - Circular SPMC buffer with a mirrored region, so any
//!   window up to the ring capacity is one contiguous slice
//! - [`BufferWriter`] / [`BufferReader`] - Producer and per-consumer
//!   endpoints with absolute item cursors
//! - [`Tag`], [`Value`] - Metadata pinned to absolute stream offsets,
//!   carried alongside the samples
//!
//! ## Topology
//!
//! - [`FlowGraph`] - Blocks plus stream/message connections, validated on
//!   every mutation
//! - [`HierBlock`] - A block whose body is a nested flow graph; flattened
//!   away before anything runs
//!
//! ## Lifecycle
//!
//! - [`TopBlock`] - `start()` / `run()` / `stop()` / `wait()`, plus
//!   `lock()` / `unlock()` for reconfiguring a paused run
//! - [`RuntimeContext`] - Per-run buffer sizing and shared stop signal
//!
//! # Example
//!
//! ```no_run
//! use corriente_core::{Block, IoSignature, TopBlock, WorkError, WorkIo};
//!
//! struct Ramp {
//!     next: f32,
//! }
//!
//! impl Block for Ramp {
//!     fn name(&self) -> &str {
//!         "ramp"
//!     }
//!     fn input_signature(&self) -> IoSignature {
//!         IoSignature::none()
//!     }
//!     fn output_signature(&self) -> IoSignature {
//!         IoSignature::fixed(1, 4)
//!     }
//!     fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError> {
//!         for slot in io.outputs[0].slice_mut::<f32>() {
//!             *slot = self.next;
//!             self.next += 1.0;
//!         }
//!         let n = io.outputs[0].capacity();
//!         io.outputs[0].produce(n);
//!         Ok(())
//!     }
//! }
//!
//! let mut tb = TopBlock::new("example");
//! let _src = tb.graph_mut().add_block(Box::new(Ramp { next: 0.0 }));
//! // ... connect a sink, then:
//! tb.start().unwrap();
//! tb.stop().unwrap();
//! tb.wait().unwrap();
//! ```

pub mod block;
pub mod buffer;
pub mod context;
pub mod error;
mod executor;
pub mod graph;
pub mod hier;
pub mod tag;
pub mod top_block;

pub use block::{Block, BlockState, IoSignature, StreamInput, StreamOutput, WorkIo};
pub use buffer::{
    BufferReader, BufferWriter, Notifier, ReadRegion, StreamBuffer, WriteRegion,
};
pub use context::RuntimeContext;
pub use error::{GraphError, Result, RuntimeError, WorkError};
pub use graph::{BlockId, EdgeId, FlowGraph, PortDomain};
pub use hier::HierBlock;
pub use tag::{Tag, TagPropagation, Value};
pub use top_block::TopBlock;
