//! Corriente Blocks - utility blocks for the corriente runtime
//!
//! Small, dependable blocks built on corriente-core, used as graph plumbing
//! in tests and applications and as reference implementations of the block
//! API:
//!
//! - [`VectorSource`] - Replays a vector, optionally forever, with tags
//! - [`VectorSink`] - Collects items and tags behind a shared handle
//! - [`MultiplyConst`] - Element-wise gain
//! - [`Add`] - N-input synchronous sum
//! - [`Head`] - Passes the first N items, then ends the stream
//! - [`NullSource`] / [`NullSink`] - Zero producer and discarding consumer
//! - [`TagDebug`] - Records and logs the tags riding on a stream
//!
//! ## Example
//!
//! ```
//! use corriente_blocks::{MultiplyConst, VectorSink, VectorSource};
//! use corriente_core::TopBlock;
//!
//! let (sink, handle) = VectorSink::<f32>::new();
//! let mut tb = TopBlock::new("gain");
//! let src = tb
//!     .graph_mut()
//!     .add_block(Box::new(VectorSource::new(vec![1.0f32, 2.0, 3.0])));
//! let gain = tb.graph_mut().add_block(Box::new(MultiplyConst::new(2.0f32)));
//! let dst = tb.graph_mut().add_block(Box::new(sink));
//! tb.graph_mut().connect(src, 0, gain, 0).unwrap();
//! tb.graph_mut().connect(gain, 0, dst, 0).unwrap();
//! tb.run().unwrap();
//! assert_eq!(handle.data(), vec![2.0, 4.0, 6.0]);
//! ```

pub mod add;
pub mod head;
pub mod multiply_const;
pub mod null_sink;
pub mod null_source;
pub mod tag_debug;
pub mod vector_sink;
pub mod vector_source;

pub use add::Add;
pub use head::Head;
pub use multiply_const::MultiplyConst;
pub use null_sink::NullSink;
pub use null_source::NullSource;
pub use tag_debug::{TagDebug, TagDebugHandle};
pub use vector_sink::{SinkHandle, VectorSink};
pub use vector_source::VectorSource;
