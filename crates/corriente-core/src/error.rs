//! Error types for the corriente runtime.
//!
//! Errors fall into three classes with different lifecycles:
//!
//! - [`GraphError`] — topology mistakes, raised synchronously by the graph
//!   mutator that was called. Always recoverable: fix the graph and retry.
//! - [`RuntimeError`] — resource and lifecycle failures raised at
//!   `start()`/`wait()` time, including fatal block errors collected from
//!   executor threads.
//! - [`WorkError`] — unrecoverable failures inside a block's `work()`. These
//!   abort the whole flow graph; "not enough input yet" is never an error.

use crate::graph::{BlockId, EdgeId};

/// Topology errors raised by graph mutation and validation.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The referenced block is not in the graph.
    #[error("block {0} not found in the graph")]
    BlockNotFound(BlockId),

    /// The referenced edge is not in the graph.
    #[error("edge {0} not found in the graph")]
    EdgeNotFound(EdgeId),

    /// No edge exists between the given ports.
    #[error("no connection from '{src}' port {src_port} to '{dst}' port {dst_port}")]
    NoSuchConnection {
        /// Source block name.
        src: String,
        /// Source port index.
        src_port: usize,
        /// Destination block name.
        dst: String,
        /// Destination port index.
        dst_port: usize,
    },

    /// A port index exceeds the block's declared signature.
    #[error("{direction} port {port} out of range for block '{block}' (max {max})")]
    PortOutOfRange {
        /// Block name.
        block: String,
        /// `"input"` or `"output"`.
        direction: &'static str,
        /// Offending port index.
        port: usize,
        /// Maximum port count declared by the signature.
        max: usize,
    },

    /// Source and destination ports carry different item sizes.
    #[error("item size mismatch: '{src}' produces {src_size}-byte items, '{dst}' expects {dst_size}-byte items")]
    ItemSizeMismatch {
        /// Source block name.
        src: String,
        /// Source item size in bytes.
        src_size: usize,
        /// Destination block name.
        dst: String,
        /// Destination item size in bytes.
        dst_size: usize,
    },

    /// A stream destination port already has an incoming connection.
    /// Fan-in on raw streams requires an explicit combiner block.
    #[error("input port {port} of block '{block}' is already connected")]
    PortAlreadyConnected {
        /// Destination block name.
        block: String,
        /// Destination port index.
        port: usize,
    },

    /// The identical edge already exists.
    #[error("connection from {src} to {dst} already exists")]
    DuplicateEdge {
        /// Source block id.
        src: BlockId,
        /// Destination block id.
        dst: BlockId,
    },

    /// A zero-port singleton block was connected twice without an
    /// intervening disconnect.
    #[error("block '{0}' is already connected to the flow graph")]
    BlockAlreadyConnected(String),

    /// The stream graph contains a combinational cycle.
    #[error("flow graph contains a cycle through stream connections")]
    CycleDetected,
}

/// Resource, lifecycle, and fatal-block errors surfaced by the top block.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A topology error detected during `start()` validation.
    #[error(transparent)]
    Topology(#[from] GraphError),

    /// A required port ended up with no connection after flattening.
    ///
    /// Raised at start time rather than construction time because
    /// hierarchical wiring may legitimately be completed incrementally.
    #[error("internally unconnected {direction} port {port} on block '{block}'")]
    UnconnectedPort {
        /// Block (or hierarchy) name.
        block: String,
        /// `"input"` or `"output"`.
        direction: &'static str,
        /// Port index.
        port: usize,
    },

    /// Buffer allocation failed.
    #[error("cannot allocate buffer: {capacity_items} items of {item_size} bytes")]
    Allocation {
        /// Requested item size in bytes.
        item_size: usize,
        /// Requested capacity in items.
        capacity_items: usize,
    },

    /// A producer tried to publish more items than the free space it was
    /// handed. Callers must check `space_available()` first; hitting this is
    /// a contract violation, not flow control.
    #[error("buffer overflow: produced {requested} items with only {available} free")]
    Overflow {
        /// Items the producer tried to publish.
        requested: usize,
        /// Free items at publish time.
        available: usize,
    },

    /// The OS refused a new executor thread.
    #[error("failed to spawn executor thread for block '{block}'")]
    Spawn {
        /// Block whose executor could not be spawned.
        block: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// `start()` was called while the graph is already running.
    #[error("flow graph is already running")]
    AlreadyRunning,

    /// A lifecycle method required a running graph.
    #[error("flow graph is not running")]
    NotRunning,

    /// `unlock()` without a matching `lock()`, or vice versa.
    #[error("flow graph is {0} locked")]
    BadLockState(&'static str),

    /// A block failed fatally inside `work()`. The whole graph was stopped.
    #[error("block '{block}' failed: {source}")]
    Block {
        /// Name of the failing block.
        block: String,
        /// The original failure.
        #[source]
        source: WorkError,
    },
}

/// Unrecoverable failure inside a block's `work()` call.
///
/// Insufficient input is a normal scheduling outcome and is expressed by
/// consuming and producing zero items — never by an error.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// Internal block invariant violated or unrecoverable state corruption.
    #[error("{0}")]
    Fatal(String),

    /// A wrapped error from the block's own dependencies.
    #[error(transparent)]
    Source(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Convenience result alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
