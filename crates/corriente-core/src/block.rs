//! The block abstraction: I/O signatures, the `work()` contract, and the
//! views handed to a block on each invocation.
//!
//! A block is anything implementing [`Block`]: it declares how many ports it
//! has and their item sizes, optionally forecasts how much input it needs for
//! a given output quantity, and transforms samples inside
//! [`work()`](Block::work). Everything else — buffers, threads, tags,
//! end-of-stream — is the scheduler's job.

use bytemuck::Pod;

use crate::error::WorkError;
use crate::graph::BlockId;
use crate::tag::{Tag, TagPropagation, Value};

/// Port-count and item-size declaration for one direction of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoSignature {
    /// Minimum number of ports that must be connected.
    pub min_ports: usize,
    /// Maximum number of ports that may be connected.
    pub max_ports: usize,
    /// Item size in bytes. Zero only for the empty signature.
    pub item_size: usize,
}

impl IoSignature {
    /// A signature with a port-count range.
    pub fn new(min_ports: usize, max_ports: usize, item_size: usize) -> Self {
        debug_assert!(min_ports <= max_ports);
        Self {
            min_ports,
            max_ports,
            item_size,
        }
    }

    /// Exactly `n` ports of `item_size`-byte items.
    pub fn fixed(n: usize, item_size: usize) -> Self {
        Self::new(n, n, item_size)
    }

    /// No ports at all (sources have no inputs, sinks no outputs,
    /// "singleton" hierarchies neither).
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }
}

/// Execution state of a block as observed by its executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    /// Constructed, not yet scheduled.
    Created,
    /// Buffers wired, executor about to run.
    Ready,
    /// Inside the scheduling loop.
    Running,
    /// Waiting for input items.
    BlockedOnInput,
    /// Waiting for output space.
    BlockedOnOutput,
    /// End-of-stream reached and drained; terminal.
    Done,
}

/// Read view of one input port for a single `work()` call.
pub struct StreamInput<'a> {
    bytes: &'a [u8],
    item_size: usize,
    abs_offset: u64,
    tags: Vec<Tag>,
    finished: bool,
    consumed: usize,
}

impl<'a> StreamInput<'a> {
    pub(crate) fn new(
        bytes: &'a [u8],
        item_size: usize,
        abs_offset: u64,
        tags: Vec<Tag>,
        finished: bool,
    ) -> Self {
        Self {
            bytes,
            item_size,
            abs_offset,
            tags,
            finished,
            consumed: 0,
        }
    }

    /// Number of items available on this port.
    pub fn items(&self) -> usize {
        self.bytes.len() / self.item_size
    }

    /// Absolute item offset of the first available item.
    pub fn abs_offset(&self) -> u64 {
        self.abs_offset
    }

    /// Raw bytes of the available items.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Typed view of the available items.
    ///
    /// # Panics
    ///
    /// Panics if `size_of::<T>()` differs from the port's item size.
    pub fn slice<T: Pod>(&self) -> &'a [T] {
        assert_eq!(std::mem::size_of::<T>(), self.item_size);
        bytemuck::cast_slice(self.bytes)
    }

    /// Tags attached within the available window, ascending by offset.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// True once the upstream block will never produce again. Items may
    /// still be pending in the window.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Declares `n` items consumed. Cumulative within one `work()` call;
    /// clamped to the available window.
    pub fn consume(&mut self, n: usize) {
        self.consumed = (self.consumed + n).min(self.items());
    }

    /// Items consumed so far in this call.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

/// Write view of one output port for a single `work()` call.
pub struct StreamOutput<'a> {
    bytes: &'a mut [u8],
    item_size: usize,
    abs_offset: u64,
    src: BlockId,
    produced: usize,
    pending_tags: Vec<Tag>,
}

impl<'a> StreamOutput<'a> {
    pub(crate) fn new(
        bytes: &'a mut [u8],
        item_size: usize,
        abs_offset: u64,
        src: BlockId,
    ) -> Self {
        Self {
            bytes,
            item_size,
            abs_offset,
            src,
            produced: 0,
            pending_tags: Vec::new(),
        }
    }

    /// Free item capacity on this port.
    pub fn capacity(&self) -> usize {
        self.bytes.len() / self.item_size
    }

    /// Absolute item offset of the first free item.
    pub fn abs_offset(&self) -> u64 {
        self.abs_offset
    }

    /// Raw bytes of the free region.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.bytes
    }

    /// Typed view of the free region.
    ///
    /// # Panics
    ///
    /// Panics if `size_of::<T>()` differs from the port's item size.
    pub fn slice_mut<T: Pod>(&mut self) -> &mut [T] {
        assert_eq!(std::mem::size_of::<T>(), self.item_size);
        bytemuck::cast_slice_mut(self.bytes)
    }

    /// Declares `n` items produced. Cumulative within one `work()` call;
    /// clamped to the free capacity.
    pub fn produce(&mut self, n: usize) {
        self.produced = (self.produced + n).min(self.capacity());
    }

    /// Items produced so far in this call.
    pub fn produced(&self) -> usize {
        self.produced
    }

    /// Attaches a tag `rel_offset` items after the first item written in
    /// this call.
    pub fn add_tag(&mut self, rel_offset: u64, key: impl Into<String>, value: Value) {
        self.pending_tags
            .push(Tag::new(self.abs_offset + rel_offset, key, value, self.src));
    }

    pub(crate) fn take_pending_tags(&mut self) -> Vec<Tag> {
        std::mem::take(&mut self.pending_tags)
    }
}

/// Everything a block sees during one `work()` invocation.
pub struct WorkIo<'a> {
    /// One read view per connected input port, in port order.
    pub inputs: Vec<StreamInput<'a>>,
    /// One write view per connected output port, in port order.
    pub outputs: Vec<StreamOutput<'a>>,
    /// Set by the block to signal it will never produce again
    /// (source exhaustion, head count reached).
    pub finished: bool,
    /// Messages posted to message-port edges during this call.
    pub(crate) posted: Vec<(usize, Value)>,
}

impl WorkIo<'_> {
    /// Posts a message on message output port `port`.
    pub fn post_message(&mut self, port: usize, msg: Value) {
        self.posted.push((port, msg));
    }
}

/// A node in the dataflow graph: a bounded, repeatable transform over
/// streams of fixed-size items.
///
/// Implementations must not block indefinitely inside
/// [`work()`](Self::work); when there is not enough data they simply
/// consume/produce nothing and the executor reschedules them once buffer
/// state changes.
pub trait Block: Send {
    /// Human-readable block name, used in thread names, logs, and errors.
    fn name(&self) -> &str;

    /// Declared input ports.
    fn input_signature(&self) -> IoSignature;

    /// Declared output ports.
    fn output_signature(&self) -> IoSignature;

    /// Items of input required on each port to produce `noutput_items`.
    ///
    /// Default: identity plus [`history()`](Self::history).
    fn forecast(&self, noutput_items: usize) -> usize {
        noutput_items + self.history()
    }

    /// Extra trailing items the block wants to see again on the next call
    /// (filter history). Default: none.
    fn history(&self) -> usize {
        0
    }

    /// Average output/input rate ratio, used for tag offset mapping on
    /// rate-changing blocks. Default 1.0.
    fn relative_rate(&self) -> f64 {
        1.0
    }

    /// Tag propagation policy applied by the executor after each call.
    fn tag_propagation(&self) -> TagPropagation {
        TagPropagation::default()
    }

    /// Number of message-domain input ports. Default: none.
    fn message_input_ports(&self) -> usize {
        0
    }

    /// Handles one message-domain delivery. Called by the executor before
    /// stream work. Default: ignore.
    fn handle_message(&mut self, port: usize, msg: Value) -> Result<(), WorkError> {
        let _ = (port, msg);
        Ok(())
    }

    /// The core transform. Consume from `io.inputs`, produce into
    /// `io.outputs`; set `io.finished` at end-of-stream. Returning an error
    /// is fatal to the whole flow graph.
    fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError>;
}
