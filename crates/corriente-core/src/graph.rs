//! The flow graph: blocks, connections, validation, and hierarchical
//! flattening.
//!
//! [`FlowGraph`] owns the topology. Mutations (add/connect/disconnect) are
//! validated synchronously and never touch running executors; at start time
//! the graph is flattened into a [`FlatGraph`] of leaf blocks and direct
//! edges, which is what the scheduler consumes. Hierarchical blocks are pure
//! pass-through wiring and never reach an executor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::block::{Block, IoSignature};
use crate::error::{GraphError, RuntimeError};
use crate::hier::HierBlock;

/// Unique identifier for a block in one flow graph.
///
/// Ids are assigned sequentially and never reused within a graph instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }

    /// Rebuilds an id from an index obtained via [`index()`](Self::index).
    #[inline]
    pub fn from_index(raw: u32) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockId({})", self.0)
    }
}

/// Unique identifier for an edge in one flow graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EdgeId(pub(crate) u32);

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EdgeId({})", self.0)
    }
}

/// Which transport an edge uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortDomain {
    /// Sample streams over circular buffers, with tags.
    Stream,
    /// Point-to-point messages over queues.
    Message,
}

/// A block shared between the graph and its executor thread.
pub(crate) type SharedBlock = Arc<Mutex<Box<dyn Block>>>;

pub(crate) enum NodeKind {
    Leaf(SharedBlock),
    Hier(HierBlock),
}

pub(crate) struct NodeData {
    pub name: String,
    pub kind: NodeKind,
    pub input_sig: IoSignature,
    pub output_sig: IoSignature,
    pub msg_inputs: usize,
    pub incoming: Vec<EdgeId>,
    pub outgoing: Vec<EdgeId>,
    /// Zero-port blocks are wired by identity; this guards double-connects.
    pub singleton_connected: bool,
}

pub(crate) struct Edge {
    pub src: BlockId,
    pub src_port: usize,
    pub dst: BlockId,
    pub dst_port: usize,
    pub domain: PortDomain,
}

/// A leaf block in the flattened graph.
pub(crate) struct FlatBlock {
    pub block: SharedBlock,
    pub name: String,
    pub input_sig: IoSignature,
    pub output_sig: IoSignature,
}

/// A direct connection between two flattened leaf blocks, by index into
/// [`FlatGraph::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FlatEdge {
    pub src: usize,
    pub src_port: usize,
    pub dst: usize,
    pub dst_port: usize,
}

/// The scheduler-facing result of flattening: leaf blocks and direct edges
/// only, hierarchy eliminated.
pub(crate) struct FlatGraph {
    pub blocks: Vec<FlatBlock>,
    pub stream_edges: Vec<FlatEdge>,
    pub msg_edges: Vec<FlatEdge>,
}

impl FlatGraph {
    /// Stable identity of a leaf block across repeated flattens: the shared
    /// block allocation itself.
    pub fn block_key(&self, idx: usize) -> usize {
        Arc::as_ptr(&self.blocks[idx].block).cast::<()>() as usize
    }

    /// Edge list keyed by stable block identity, for comparing topologies
    /// across flattens.
    #[cfg(test)]
    pub fn edge_summary(&self) -> Vec<((usize, usize), (usize, usize))> {
        let mut edges: Vec<_> = self
            .stream_edges
            .iter()
            .map(|e| {
                (
                    (self.block_key(e.src), e.src_port),
                    (self.block_key(e.dst), e.dst_port),
                )
            })
            .collect();
        edges.sort_unstable();
        edges
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        // Iterative DFS with white/grey/black coloring over stream edges.
        let n = self.blocks.len();
        let mut adjacency = vec![Vec::new(); n];
        for e in &self.stream_edges {
            adjacency[e.src].push(e.dst);
        }
        let mut color = vec![0u8; n];
        for start in 0..n {
            if color[start] != 0 {
                continue;
            }
            let mut stack = vec![(start, 0usize)];
            color[start] = 1;
            while let Some(&mut (node, ref mut next)) = stack.last_mut() {
                if *next < adjacency[node].len() {
                    let child = adjacency[node][*next];
                    *next += 1;
                    match color[child] {
                        0 => {
                            color[child] = 1;
                            stack.push((child, 0));
                        }
                        1 => return Err(GraphError::CycleDetected),
                        _ => {}
                    }
                } else {
                    color[node] = 2;
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}

/// Resolution of one graph-level node to flattened endpoints.
enum Resolved {
    Leaf(usize),
    Hier {
        /// External input index → inner leaf destinations.
        inputs: Vec<Vec<(usize, usize)>>,
        /// External output index → inner leaf source.
        outputs: Vec<Option<(usize, usize)>>,
        name: String,
    },
}

/// The directed graph of blocks and connections describing one runnable
/// pipeline.
///
/// Lifecycle: construct → mutate (connect/disconnect) → validate and flatten
/// at start → optionally mutate again between `lock()`/`unlock()`.
pub struct FlowGraph {
    nodes: Vec<Option<NodeData>>,
    edges: Vec<Option<Edge>>,
    next_node_slot: u32,
    next_edge_slot: u32,
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowGraph {
    /// Creates an empty flow graph.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            next_node_slot: 0,
            next_edge_slot: 0,
        }
    }

    // --- Node mutations ---

    /// Adds a leaf block. Returns the new block's id.
    pub fn add_block(&mut self, block: Box<dyn Block>) -> BlockId {
        let name = block.name().to_owned();
        let input_sig = block.input_signature();
        let output_sig = block.output_signature();
        let msg_inputs = block.message_input_ports();
        let id = self.insert_node(NodeData {
            name: name.clone(),
            kind: NodeKind::Leaf(Arc::new(Mutex::new(block))),
            input_sig,
            output_sig,
            msg_inputs,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            singleton_connected: false,
        });
        tracing::debug!("graph_add: leaf block '{name}' as {id}");
        id
    }

    /// Adds a hierarchical block. Returns the new block's id.
    pub fn add_hier(&mut self, hier: HierBlock) -> BlockId {
        let name = hier.name().to_owned();
        let input_sig = hier.input_signature();
        let output_sig = hier.output_signature();
        let id = self.insert_node(NodeData {
            name: name.clone(),
            kind: NodeKind::Hier(hier),
            input_sig,
            output_sig,
            msg_inputs: 0,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            singleton_connected: false,
        });
        tracing::debug!("graph_add: hierarchical block '{name}' as {id}");
        id
    }

    fn insert_node(&mut self, node: NodeData) -> BlockId {
        let id = BlockId(self.next_node_slot);
        self.next_node_slot += 1;
        let idx = id.0 as usize;
        if idx >= self.nodes.len() {
            self.nodes.resize_with(idx + 1, || None);
        }
        self.nodes[idx] = Some(node);
        id
    }

    /// Removes a block and every edge touching it. Its id is never reused.
    pub fn remove_block(&mut self, id: BlockId) -> Result<(), GraphError> {
        let node = self.node(id)?;
        let name = node.name.clone();
        let mut touching: Vec<EdgeId> = node.incoming.clone();
        touching.extend(&node.outgoing);
        for edge_id in touching {
            let Some(edge) = self.edges[edge_id.0 as usize].take() else {
                continue;
            };
            self.node_mut(edge.src)?.outgoing.retain(|&e| e != edge_id);
            self.node_mut(edge.dst)?.incoming.retain(|&e| e != edge_id);
        }
        self.nodes[id.0 as usize] = None;
        tracing::debug!("graph_remove: block '{name}' ({id})");
        Ok(())
    }

    pub(crate) fn node(&self, id: BlockId) -> Result<&NodeData, GraphError> {
        self.nodes
            .get(id.0 as usize)
            .and_then(|n| n.as_ref())
            .ok_or(GraphError::BlockNotFound(id))
    }

    fn node_mut(&mut self, id: BlockId) -> Result<&mut NodeData, GraphError> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(|n| n.as_mut())
            .ok_or(GraphError::BlockNotFound(id))
    }

    /// Number of blocks in the graph.
    pub fn block_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// Number of edges (both domains) in the graph.
    pub fn edge_count(&self) -> usize {
        self.edges.iter().flatten().count()
    }

    // --- Connections ---

    /// Connects a stream edge from `(src, src_port)` to `(dst, dst_port)`
    /// and returns its id.
    ///
    /// Fails if either block is missing, a port index is out of range, item
    /// sizes differ, the destination port already has an incoming stream
    /// connection (fan-in on raw streams is forbidden), or the identical
    /// edge already exists. Fan-out from one source port is allowed.
    pub fn connect(
        &mut self,
        src: BlockId,
        src_port: usize,
        dst: BlockId,
        dst_port: usize,
    ) -> Result<EdgeId, GraphError> {
        let src_node = self.node(src)?;
        let dst_node = self.node(dst)?;

        if src_port >= src_node.output_sig.max_ports {
            return Err(GraphError::PortOutOfRange {
                block: src_node.name.clone(),
                direction: "output",
                port: src_port,
                max: src_node.output_sig.max_ports,
            });
        }
        if dst_port >= dst_node.input_sig.max_ports {
            return Err(GraphError::PortOutOfRange {
                block: dst_node.name.clone(),
                direction: "input",
                port: dst_port,
                max: dst_node.input_sig.max_ports,
            });
        }
        if src_node.output_sig.item_size != dst_node.input_sig.item_size {
            return Err(GraphError::ItemSizeMismatch {
                src: src_node.name.clone(),
                src_size: src_node.output_sig.item_size,
                dst: dst_node.name.clone(),
                dst_size: dst_node.input_sig.item_size,
            });
        }
        for edge in self.edges.iter().flatten() {
            if edge.domain != PortDomain::Stream {
                continue;
            }
            if edge.dst == dst && edge.dst_port == dst_port {
                if edge.src == src && edge.src_port == src_port {
                    return Err(GraphError::DuplicateEdge { src, dst });
                }
                return Err(GraphError::PortAlreadyConnected {
                    block: dst_node.name.clone(),
                    port: dst_port,
                });
            }
        }

        let id = self.insert_edge(Edge {
            src,
            src_port,
            dst,
            dst_port,
            domain: PortDomain::Stream,
        })?;
        tracing::debug!("graph_connect: {src}:{src_port} → {dst}:{dst_port}");
        Ok(id)
    }

    /// Connects a message-domain edge and returns its id. Fan-in and
    /// fan-out are both allowed.
    pub fn connect_message(
        &mut self,
        src: BlockId,
        src_port: usize,
        dst: BlockId,
        dst_port: usize,
    ) -> Result<EdgeId, GraphError> {
        self.node(src)?;
        let dst_node = self.node(dst)?;
        if dst_port >= dst_node.msg_inputs {
            return Err(GraphError::PortOutOfRange {
                block: dst_node.name.clone(),
                direction: "input",
                port: dst_port,
                max: dst_node.msg_inputs,
            });
        }
        let duplicate = self.edges.iter().flatten().any(|e| {
            e.domain == PortDomain::Message
                && e.src == src
                && e.src_port == src_port
                && e.dst == dst
                && e.dst_port == dst_port
        });
        if duplicate {
            return Err(GraphError::DuplicateEdge { src, dst });
        }
        let id = self.insert_edge(Edge {
            src,
            src_port,
            dst,
            dst_port,
            domain: PortDomain::Message,
        })?;
        tracing::debug!("graph_connect: message {src}:{src_port} → {dst}:{dst_port}");
        Ok(id)
    }

    /// Registers a zero-port block (pure orchestration hierarchy or message
    /// block) as wired into the graph.
    ///
    /// Connecting the same singleton twice without an intervening
    /// [`disconnect_singleton()`](Self::disconnect_singleton) is a topology
    /// error.
    pub fn connect_singleton(&mut self, id: BlockId) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        if node.singleton_connected {
            return Err(GraphError::BlockAlreadyConnected(node.name.clone()));
        }
        node.singleton_connected = true;
        tracing::debug!("graph_connect: singleton {id}");
        Ok(())
    }

    /// Unregisters a singleton block.
    pub fn disconnect_singleton(&mut self, id: BlockId) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        if !node.singleton_connected {
            let name = node.name.clone();
            return Err(GraphError::NoSuchConnection {
                src: name.clone(),
                src_port: 0,
                dst: name,
                dst_port: 0,
            });
        }
        node.singleton_connected = false;
        tracing::debug!("graph_disconnect: singleton {id}");
        Ok(())
    }

    fn insert_edge(&mut self, edge: Edge) -> Result<EdgeId, GraphError> {
        let id = EdgeId(self.next_edge_slot);
        self.next_edge_slot += 1;
        let (src, dst) = (edge.src, edge.dst);
        let idx = id.0 as usize;
        if idx >= self.edges.len() {
            self.edges.resize_with(idx + 1, || None);
        }
        self.edges[idx] = Some(edge);
        self.node_mut(src)?.outgoing.push(id);
        self.node_mut(dst)?.incoming.push(id);
        Ok(id)
    }

    /// Removes the stream edge from `(src, src_port)` to `(dst, dst_port)`.
    pub fn disconnect(
        &mut self,
        src: BlockId,
        src_port: usize,
        dst: BlockId,
        dst_port: usize,
    ) -> Result<(), GraphError> {
        let found = self.edges.iter().position(|slot| {
            slot.as_ref().is_some_and(|e| {
                e.domain == PortDomain::Stream
                    && e.src == src
                    && e.src_port == src_port
                    && e.dst == dst
                    && e.dst_port == dst_port
            })
        });
        let Some(idx) = found else {
            return Err(GraphError::NoSuchConnection {
                src: self.node(src)?.name.clone(),
                src_port,
                dst: self.node(dst)?.name.clone(),
                dst_port,
            });
        };
        let id = EdgeId(idx as u32);
        self.edges[idx] = None;
        self.node_mut(src)?.outgoing.retain(|&e| e != id);
        self.node_mut(dst)?.incoming.retain(|&e| e != id);
        tracing::debug!("graph_disconnect: {src}:{src_port} → {dst}:{dst_port}");
        Ok(())
    }

    /// Removes the edge with the given id, in either domain.
    pub fn disconnect_edge(&mut self, id: EdgeId) -> Result<(), GraphError> {
        let Some(edge) = self.edges.get_mut(id.0 as usize).and_then(Option::take) else {
            return Err(GraphError::EdgeNotFound(id));
        };
        self.node_mut(edge.src)?.outgoing.retain(|&e| e != id);
        self.node_mut(edge.dst)?.incoming.retain(|&e| e != id);
        tracing::debug!("graph_disconnect: {id}");
        Ok(())
    }

    /// Removes every edge in both domains; blocks stay.
    pub fn disconnect_all(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.incoming.clear();
            node.outgoing.clear();
            node.singleton_connected = false;
        }
        for slot in &mut self.edges {
            *slot = None;
        }
        tracing::debug!("graph_disconnect: all edges removed");
    }

    // --- Validation ---

    /// Fails with [`GraphError::CycleDetected`] if the stream edges form a
    /// cycle. Pure combinational feedback has no buffering to break the
    /// deadlock; feedback requires an explicit buffering block.
    pub fn check_topology(&self) -> Result<(), GraphError> {
        // Coloring DFS over the top-level graph; nested graphs are checked
        // again after flattening.
        let n = self.nodes.len();
        let mut adjacency = vec![Vec::new(); n];
        for e in self.edges.iter().flatten() {
            if e.domain == PortDomain::Stream {
                adjacency[e.src.0 as usize].push(e.dst.0 as usize);
            }
        }
        let mut color = vec![0u8; n];
        for start in 0..n {
            if color[start] != 0 || self.nodes[start].is_none() {
                continue;
            }
            let mut stack = vec![(start, 0usize)];
            color[start] = 1;
            while let Some(&mut (node, ref mut next)) = stack.last_mut() {
                if *next < adjacency[node].len() {
                    let child = adjacency[node][*next];
                    *next += 1;
                    match color[child] {
                        0 => {
                            color[child] = 1;
                            stack.push((child, 0));
                        }
                        1 => return Err(GraphError::CycleDetected),
                        _ => {}
                    }
                } else {
                    color[node] = 2;
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    // --- Flattening ---

    /// Recursively expands hierarchical blocks into direct leaf-to-leaf
    /// connections and validates that every port required by a signature
    /// minimum ended up connected.
    ///
    /// Raised at start time rather than connect time because hierarchical
    /// wiring may be completed incrementally after the hier is inserted.
    pub(crate) fn flatten(&self) -> Result<FlatGraph, RuntimeError> {
        let mut flat = FlatGraph {
            blocks: Vec::new(),
            stream_edges: Vec::new(),
            msg_edges: Vec::new(),
        };
        Self::flatten_into(self, &mut flat)?;
        flat.check_acyclic().map_err(RuntimeError::Topology)?;
        Self::check_required_ports(&flat)?;
        tracing::debug!(
            "graph_flatten: {} leaf blocks, {} stream edges, {} message edges",
            flat.blocks.len(),
            flat.stream_edges.len(),
            flat.msg_edges.len()
        );
        Ok(flat)
    }

    fn flatten_into(
        graph: &FlowGraph,
        flat: &mut FlatGraph,
    ) -> Result<HashMap<u32, Resolved>, RuntimeError> {
        let mut resolution: HashMap<u32, Resolved> = HashMap::new();

        for (idx, slot) in graph.nodes.iter().enumerate() {
            let Some(node) = slot else { continue };
            let resolved = match &node.kind {
                NodeKind::Leaf(block) => {
                    flat.blocks.push(FlatBlock {
                        block: Arc::clone(block),
                        name: node.name.clone(),
                        input_sig: node.input_sig,
                        output_sig: node.output_sig,
                    });
                    Resolved::Leaf(flat.blocks.len() - 1)
                }
                NodeKind::Hier(hier) => {
                    let inner = Self::flatten_into(hier.inner(), flat)?;
                    let mut inputs = Vec::with_capacity(node.input_sig.max_ports);
                    for ext in 0..node.input_sig.max_ports {
                        let mut targets = Vec::new();
                        for port_ref in hier.input_targets(ext) {
                            Self::resolve_input(&inner, port_ref.0, port_ref.1, &mut targets)?;
                        }
                        inputs.push(targets);
                    }
                    let mut outputs = Vec::with_capacity(node.output_sig.max_ports);
                    for ext in 0..node.output_sig.max_ports {
                        let source = match hier.output_source(ext) {
                            Some(port_ref) => {
                                Some(Self::resolve_output(&inner, port_ref.0, port_ref.1)?)
                            }
                            None => None,
                        };
                        outputs.push(source);
                    }
                    // Inner edges landed in `flat` already via the recursive
                    // call; only the external pass-through remains.
                    Resolved::Hier {
                        inputs,
                        outputs,
                        name: node.name.clone(),
                    }
                }
            };
            resolution.insert(idx as u32, resolved);
        }

        for edge in graph.edges.iter().flatten() {
            let sources = match &resolution[&edge.src.0] {
                Resolved::Leaf(idx) => vec![(*idx, edge.src_port)],
                Resolved::Hier { outputs, name, .. } => match outputs.get(edge.src_port) {
                    Some(Some(endpoint)) => vec![*endpoint],
                    _ => {
                        return Err(RuntimeError::UnconnectedPort {
                            block: name.clone(),
                            direction: "output",
                            port: edge.src_port,
                        });
                    }
                },
            };
            let destinations = match &resolution[&edge.dst.0] {
                Resolved::Leaf(idx) => vec![(*idx, edge.dst_port)],
                Resolved::Hier { inputs, name, .. } => {
                    let targets = inputs.get(edge.dst_port).cloned().unwrap_or_default();
                    if targets.is_empty() {
                        return Err(RuntimeError::UnconnectedPort {
                            block: name.clone(),
                            direction: "input",
                            port: edge.dst_port,
                        });
                    }
                    targets
                }
            };
            for &(src, src_port) in &sources {
                for &(dst, dst_port) in &destinations {
                    let flat_edge = FlatEdge {
                        src,
                        src_port,
                        dst,
                        dst_port,
                    };
                    match edge.domain {
                        PortDomain::Stream => flat.stream_edges.push(flat_edge),
                        PortDomain::Message => flat.msg_edges.push(flat_edge),
                    }
                }
            }
        }

        Ok(resolution)
    }

    fn resolve_input(
        inner: &HashMap<u32, Resolved>,
        block: BlockId,
        port: usize,
        out: &mut Vec<(usize, usize)>,
    ) -> Result<(), RuntimeError> {
        match &inner[&block.0] {
            Resolved::Leaf(idx) => {
                out.push((*idx, port));
                Ok(())
            }
            Resolved::Hier { inputs, name, .. } => {
                let targets = inputs.get(port).cloned().unwrap_or_default();
                if targets.is_empty() {
                    return Err(RuntimeError::UnconnectedPort {
                        block: name.clone(),
                        direction: "input",
                        port,
                    });
                }
                out.extend(targets);
                Ok(())
            }
        }
    }

    fn resolve_output(
        inner: &HashMap<u32, Resolved>,
        block: BlockId,
        port: usize,
    ) -> Result<(usize, usize), RuntimeError> {
        match &inner[&block.0] {
            Resolved::Leaf(idx) => Ok((*idx, port)),
            Resolved::Hier { outputs, name, .. } => match outputs.get(port) {
                Some(Some(endpoint)) => Ok(*endpoint),
                _ => Err(RuntimeError::UnconnectedPort {
                    block: name.clone(),
                    direction: "output",
                    port,
                }),
            },
        }
    }

    fn check_required_ports(flat: &FlatGraph) -> Result<(), RuntimeError> {
        let mut has_incoming = vec![Vec::new(); flat.blocks.len()];
        let mut has_outgoing = vec![Vec::new(); flat.blocks.len()];
        for block_idx in 0..flat.blocks.len() {
            has_incoming[block_idx] = vec![false; flat.blocks[block_idx].input_sig.max_ports];
            has_outgoing[block_idx] = vec![false; flat.blocks[block_idx].output_sig.max_ports];
        }
        for e in &flat.stream_edges {
            if let Some(flag) = has_incoming[e.dst].get_mut(e.dst_port) {
                *flag = true;
            }
            if let Some(flag) = has_outgoing[e.src].get_mut(e.src_port) {
                *flag = true;
            }
        }
        for (idx, block) in flat.blocks.iter().enumerate() {
            for port in 0..block.input_sig.min_ports {
                if !has_incoming[idx][port] {
                    return Err(RuntimeError::UnconnectedPort {
                        block: block.name.clone(),
                        direction: "input",
                        port,
                    });
                }
            }
            for port in 0..block.output_sig.min_ports {
                if !has_outgoing[idx][port] {
                    return Err(RuntimeError::UnconnectedPort {
                        block: block.name.clone(),
                        direction: "output",
                        port,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::WorkIo;
    use crate::error::WorkError;

    struct Stub {
        name: &'static str,
        inputs: IoSignature,
        outputs: IoSignature,
    }

    impl Stub {
        fn source() -> Box<dyn Block> {
            Box::new(Self {
                name: "source",
                inputs: IoSignature::none(),
                outputs: IoSignature::fixed(1, 4),
            })
        }
        fn sink() -> Box<dyn Block> {
            Box::new(Self {
                name: "sink",
                inputs: IoSignature::fixed(1, 4),
                outputs: IoSignature::none(),
            })
        }
        fn unit() -> Box<dyn Block> {
            Box::new(Self {
                name: "unit",
                inputs: IoSignature::fixed(1, 4),
                outputs: IoSignature::fixed(1, 4),
            })
        }
        fn wide_sink() -> Box<dyn Block> {
            Box::new(Self {
                name: "wide_sink",
                inputs: IoSignature::fixed(1, 8),
                outputs: IoSignature::none(),
            })
        }
    }

    impl Block for Stub {
        fn name(&self) -> &str {
            self.name
        }
        fn input_signature(&self) -> IoSignature {
            self.inputs
        }
        fn output_signature(&self) -> IoSignature {
            self.outputs
        }
        fn work(&mut self, _io: &mut WorkIo) -> Result<(), WorkError> {
            Ok(())
        }
    }

    #[test]
    fn connect_validates_port_ranges() {
        let mut graph = FlowGraph::new();
        let src = graph.add_block(Stub::source());
        let dst = graph.add_block(Stub::sink());

        assert!(matches!(
            graph.connect(src, 1, dst, 0),
            Err(GraphError::PortOutOfRange {
                direction: "output",
                ..
            })
        ));
        assert!(matches!(
            graph.connect(src, 0, dst, 3),
            Err(GraphError::PortOutOfRange {
                direction: "input",
                ..
            })
        ));
        graph.connect(src, 0, dst, 0).unwrap();
    }

    #[test]
    fn connect_rejects_item_size_mismatch() {
        let mut graph = FlowGraph::new();
        let src = graph.add_block(Stub::source());
        let dst = graph.add_block(Stub::wide_sink());
        assert!(matches!(
            graph.connect(src, 0, dst, 0),
            Err(GraphError::ItemSizeMismatch { .. })
        ));
    }

    #[test]
    fn stream_fan_in_is_rejected() {
        let mut graph = FlowGraph::new();
        let a = graph.add_block(Stub::source());
        let b = graph.add_block(Stub::source());
        let sink = graph.add_block(Stub::sink());

        graph.connect(a, 0, sink, 0).unwrap();
        assert!(matches!(
            graph.connect(b, 0, sink, 0),
            Err(GraphError::PortAlreadyConnected { .. })
        ));
    }

    #[test]
    fn duplicate_edge_is_rejected() {
        let mut graph = FlowGraph::new();
        let src = graph.add_block(Stub::source());
        let dst = graph.add_block(Stub::sink());
        graph.connect(src, 0, dst, 0).unwrap();
        assert!(matches!(
            graph.connect(src, 0, dst, 0),
            Err(GraphError::DuplicateEdge { .. })
        ));
    }

    #[test]
    fn fan_out_is_allowed() {
        let mut graph = FlowGraph::new();
        let src = graph.add_block(Stub::source());
        let s1 = graph.add_block(Stub::sink());
        let s2 = graph.add_block(Stub::sink());
        graph.connect(src, 0, s1, 0).unwrap();
        graph.connect(src, 0, s2, 0).unwrap();
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn disconnect_then_reconnect_restores_topology() {
        let mut graph = FlowGraph::new();
        let src = graph.add_block(Stub::source());
        let mid = graph.add_block(Stub::unit());
        let dst = graph.add_block(Stub::sink());
        graph.connect(src, 0, mid, 0).unwrap();
        graph.connect(mid, 0, dst, 0).unwrap();

        let before = graph.flatten().unwrap().edge_summary();

        graph.disconnect(src, 0, mid, 0).unwrap();
        graph.connect(src, 0, mid, 0).unwrap();

        let after = graph.flatten().unwrap().edge_summary();
        assert_eq!(before, after);
    }

    #[test]
    fn disconnect_by_edge_id() {
        let mut graph = FlowGraph::new();
        let src = graph.add_block(Stub::source());
        let dst = graph.add_block(Stub::sink());
        let edge = graph.connect(src, 0, dst, 0).unwrap();

        graph.disconnect_edge(edge).unwrap();
        assert_eq!(graph.edge_count(), 0);
        assert!(matches!(
            graph.disconnect_edge(edge),
            Err(GraphError::EdgeNotFound(_))
        ));
    }

    #[test]
    fn disconnect_missing_edge_fails() {
        let mut graph = FlowGraph::new();
        let src = graph.add_block(Stub::source());
        let dst = graph.add_block(Stub::sink());
        assert!(matches!(
            graph.disconnect(src, 0, dst, 0),
            Err(GraphError::NoSuchConnection { .. })
        ));
    }

    #[test]
    fn cycle_detection_direct_and_indirect() {
        let mut graph = FlowGraph::new();
        let a = graph.add_block(Stub::unit());
        let b = graph.add_block(Stub::unit());
        let c = graph.add_block(Stub::unit());

        graph.connect(a, 0, b, 0).unwrap();
        graph.connect(b, 0, c, 0).unwrap();
        graph.check_topology().unwrap();

        graph.connect(c, 0, a, 0).unwrap();
        assert!(matches!(
            graph.check_topology(),
            Err(GraphError::CycleDetected)
        ));
    }

    #[test]
    fn flatten_rejects_unconnected_required_input() {
        let mut graph = FlowGraph::new();
        let mid = graph.add_block(Stub::unit());
        let dst = graph.add_block(Stub::sink());
        // mid's input is never connected.
        graph.connect(mid, 0, dst, 0).unwrap();

        assert!(matches!(
            graph.flatten(),
            Err(RuntimeError::UnconnectedPort {
                direction: "input",
                ..
            })
        ));
    }

    #[test]
    fn remove_block_drops_its_edges() {
        let mut graph = FlowGraph::new();
        let src = graph.add_block(Stub::source());
        let mid = graph.add_block(Stub::unit());
        let dst = graph.add_block(Stub::sink());
        graph.connect(src, 0, mid, 0).unwrap();
        graph.connect(mid, 0, dst, 0).unwrap();

        graph.remove_block(mid).unwrap();
        assert_eq!(graph.block_count(), 2);
        assert_eq!(graph.edge_count(), 0);
        assert!(matches!(
            graph.connect(src, 0, mid, 0),
            Err(GraphError::BlockNotFound(_))
        ));

        // Bypass the removed block and flatten cleanly.
        graph.connect(src, 0, dst, 0).unwrap();
        graph.flatten().unwrap();
    }

    #[test]
    fn singleton_double_connect_fails() {
        let mut graph = FlowGraph::new();
        let hier = HierBlock::new("orchestrator", IoSignature::none(), IoSignature::none());
        let id = graph.add_hier(hier);

        graph.connect_singleton(id).unwrap();
        assert!(matches!(
            graph.connect_singleton(id),
            Err(GraphError::BlockAlreadyConnected(_))
        ));
        graph.disconnect_singleton(id).unwrap();
        graph.connect_singleton(id).unwrap();
    }
}
