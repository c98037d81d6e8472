//! Hierarchical blocks: a block whose body is itself a flow graph.
//!
//! A [`HierBlock`] exposes external ports that are purely virtual — wiring,
//! not computation. `FlowGraph::flatten()` rewrites every edge touching a
//! hierarchy into direct leaf-to-leaf connections, so the scheduler never
//! sees one. Hierarchies nest arbitrarily.
//!
//! A hierarchy with zero external ports ("singleton") is pure orchestration:
//! its inner blocks still run, and it is wired into a parent graph by
//! identity via `FlowGraph::connect_singleton()`.

use crate::block::IoSignature;
use crate::error::GraphError;
use crate::graph::{BlockId, FlowGraph};

/// A block implemented as a sub-graph of other blocks.
pub struct HierBlock {
    name: String,
    graph: FlowGraph,
    input_sig: IoSignature,
    output_sig: IoSignature,
    /// External input index → inner destinations (internal fan-out allowed).
    input_map: Vec<Vec<(BlockId, usize)>>,
    /// External output index → single inner source.
    output_map: Vec<Option<(BlockId, usize)>>,
}

impl HierBlock {
    /// Creates an empty hierarchy with the given external signatures.
    pub fn new(name: impl Into<String>, input_sig: IoSignature, output_sig: IoSignature) -> Self {
        Self {
            name: name.into(),
            graph: FlowGraph::new(),
            input_sig,
            output_sig,
            input_map: vec![Vec::new(); input_sig.max_ports],
            output_map: vec![None; output_sig.max_ports],
        }
    }

    /// The hierarchy's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared external input ports.
    pub fn input_signature(&self) -> IoSignature {
        self.input_sig
    }

    /// Declared external output ports.
    pub fn output_signature(&self) -> IoSignature {
        self.output_sig
    }

    /// The inner graph, for adding blocks and internal connections.
    pub fn graph_mut(&mut self) -> &mut FlowGraph {
        &mut self.graph
    }

    pub(crate) fn inner(&self) -> &FlowGraph {
        &self.graph
    }

    pub(crate) fn input_targets(&self, ext: usize) -> &[(BlockId, usize)] {
        self.input_map.get(ext).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn output_source(&self, ext: usize) -> Option<(BlockId, usize)> {
        self.output_map.get(ext).copied().flatten()
    }

    /// Wires external input `ext` to `port` of inner block `inner`.
    ///
    /// One external input may fan out to several inner destinations.
    pub fn connect_input(
        &mut self,
        ext: usize,
        inner: BlockId,
        port: usize,
    ) -> Result<(), GraphError> {
        if ext >= self.input_sig.max_ports {
            return Err(GraphError::PortOutOfRange {
                block: self.name.clone(),
                direction: "input",
                port: ext,
                max: self.input_sig.max_ports,
            });
        }
        let node = self.graph.node(inner)?;
        if port >= node.input_sig.max_ports {
            return Err(GraphError::PortOutOfRange {
                block: node.name.clone(),
                direction: "input",
                port,
                max: node.input_sig.max_ports,
            });
        }
        if node.input_sig.item_size != self.input_sig.item_size {
            return Err(GraphError::ItemSizeMismatch {
                src: self.name.clone(),
                src_size: self.input_sig.item_size,
                dst: node.name.clone(),
                dst_size: node.input_sig.item_size,
            });
        }
        self.input_map[ext].push((inner, port));
        Ok(())
    }

    /// Wires external output `ext` to be fed by `port` of inner block
    /// `inner`. Exactly one inner source per external output (the fan-in
    /// rule applies through the hierarchy boundary).
    pub fn connect_output(
        &mut self,
        ext: usize,
        inner: BlockId,
        port: usize,
    ) -> Result<(), GraphError> {
        if ext >= self.output_sig.max_ports {
            return Err(GraphError::PortOutOfRange {
                block: self.name.clone(),
                direction: "output",
                port: ext,
                max: self.output_sig.max_ports,
            });
        }
        let node = self.graph.node(inner)?;
        if port >= node.output_sig.max_ports {
            return Err(GraphError::PortOutOfRange {
                block: node.name.clone(),
                direction: "output",
                port,
                max: node.output_sig.max_ports,
            });
        }
        if node.output_sig.item_size != self.output_sig.item_size {
            return Err(GraphError::ItemSizeMismatch {
                src: node.name.clone(),
                src_size: node.output_sig.item_size,
                dst: self.name.clone(),
                dst_size: self.output_sig.item_size,
            });
        }
        if self.output_map[ext].is_some() {
            return Err(GraphError::PortAlreadyConnected {
                block: self.name.clone(),
                port: ext,
            });
        }
        self.output_map[ext] = Some((inner, port));
        Ok(())
    }
}
