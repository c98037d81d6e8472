//! The top block: lifecycle control for one runnable flow graph.
//!
//! [`TopBlock`] owns a [`FlowGraph`] and a [`RuntimeContext`] and drives the
//! run: flatten, allocate buffers, spawn one executor thread per leaf block,
//! then `wait()` for natural termination or `stop()` for a graceful
//! shutdown. `lock()`/`unlock()` pause the run for topology surgery —
//! connections whose endpoints did not change keep their buffered items
//! across the pause.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::block::BlockState;
use crate::buffer::{BufferReader, BufferWriter, Notifier, StreamBuffer};
use crate::context::RuntimeContext;
use crate::error::{Result, RuntimeError, WorkError};
use crate::executor::{BlockExecutor, MessageRoute};
use crate::graph::{BlockId, FlatGraph, FlowGraph};
use crate::tag::Value;

/// Identity of one stream connection across repeated flattens: stable block
/// keys on both ends plus the item size. Buffers are reused across
/// `lock()`/`unlock()` exactly when the key matches.
#[derive(Clone, PartialEq, Eq, Hash)]
struct BufferKey {
    src: usize,
    src_port: usize,
    /// Sorted (destination key, destination port) pairs.
    dsts: Vec<(usize, usize)>,
    item_size: usize,
}

enum RunState {
    Idle,
    Running(Vec<(String, JoinHandle<()>)>),
    Locked,
}

/// Owner of a flow graph and its executor threads.
pub struct TopBlock {
    name: String,
    graph: FlowGraph,
    ctx: RuntimeContext,
    cache: HashMap<BufferKey, Arc<StreamBuffer>>,
    state: RunState,
}

impl TopBlock {
    /// A top block with default runtime settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_context(name, RuntimeContext::new())
    }

    /// A top block with an explicit runtime context (buffer sizing, shared
    /// stop signal).
    pub fn with_context(name: impl Into<String>, ctx: RuntimeContext) -> Self {
        Self {
            name: name.into(),
            graph: FlowGraph::new(),
            ctx,
            cache: HashMap::new(),
            state: RunState::Idle,
        }
    }

    /// The top block's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The runtime context, for sharing a stop signal with other threads.
    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// The owned flow graph.
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Mutable access to the owned flow graph.
    ///
    /// Mutations never affect executors already running; they take effect at
    /// the next `start()` or `unlock()`.
    pub fn graph_mut(&mut self) -> &mut FlowGraph {
        &mut self.graph
    }

    /// Validates, flattens, allocates buffers, and spawns one executor
    /// thread per leaf block. Returns once everything is running.
    pub fn start(&mut self) -> Result<()> {
        if !matches!(self.state, RunState::Idle) {
            return Err(RuntimeError::AlreadyRunning);
        }
        self.ctx.reset_run();
        self.cache.clear();
        let handles = self.launch()?;
        tracing::info!(top_block = %self.name, executors = handles.len(), "started");
        self.state = RunState::Running(handles);
        Ok(())
    }

    /// Blocks until every executor exits, then reports the first fatal
    /// error of the run, if any.
    pub fn wait(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, RunState::Idle) {
            RunState::Running(handles) => {
                self.join_all(handles);
                self.cache.clear();
                tracing::info!(top_block = %self.name, "finished");
                match self.ctx.take_fatal() {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
            RunState::Locked => {
                self.state = RunState::Locked;
                Err(RuntimeError::BadLockState("still"))
            }
            RunState::Idle => Err(RuntimeError::NotRunning),
        }
    }

    /// `start()` followed by `wait()`.
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        self.wait()
    }

    /// Requests a graceful shutdown: sources stop producing and every block
    /// downstream drains what is already buffered. Returns immediately;
    /// `wait()` observes completion.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            RunState::Running(_) | RunState::Locked => {
                tracing::info!(top_block = %self.name, "stop requested");
                self.ctx.request_stop();
                Ok(())
            }
            RunState::Idle => Err(RuntimeError::NotRunning),
        }
    }

    /// Pauses the run for topology surgery: executors exit at the next
    /// iteration boundary, leaving block state, buffered items, and
    /// end-of-stream flags untouched.
    pub fn lock(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, RunState::Locked) {
            RunState::Running(handles) => {
                tracing::info!(top_block = %self.name, "locking");
                self.ctx.request_pause();
                self.join_all(handles);
                Ok(())
            }
            RunState::Locked => Err(RuntimeError::BadLockState("already")),
            RunState::Idle => {
                self.state = RunState::Idle;
                Err(RuntimeError::NotRunning)
            }
        }
    }

    /// Resumes a locked run under the (possibly modified) topology.
    ///
    /// Connections whose endpoints and consumer set are unchanged keep
    /// their buffers, so in-flight items survive; touched connections get
    /// fresh empty buffers.
    pub fn unlock(&mut self) -> Result<()> {
        if !matches!(self.state, RunState::Locked) {
            return Err(RuntimeError::BadLockState("not"));
        }
        self.ctx.resume_run();
        let handles = self.launch()?;
        tracing::info!(top_block = %self.name, executors = handles.len(), "unlocked");
        self.state = RunState::Running(handles);
        Ok(())
    }

    fn join_all(&self, handles: Vec<(String, JoinHandle<()>)>) {
        for (name, handle) in handles {
            if handle.join().is_err() {
                self.ctx.set_fatal(RuntimeError::Block {
                    block: name,
                    source: WorkError::Fatal("work() panicked".to_owned()),
                });
            }
        }
    }

    /// Flattens the graph, wires buffers and message channels, and spawns
    /// the executors.
    fn launch(&mut self) -> Result<Vec<(String, JoinHandle<()>)>> {
        let flat = self.graph.flatten()?;
        let n = flat.blocks.len();

        let notifiers: Vec<Arc<Notifier>> = (0..n).map(|_| Notifier::new()).collect();
        for notifier in &notifiers {
            self.ctx.register_notifier(Arc::clone(notifier));
        }

        let (inputs, outputs) = self.wire_buffers(&flat, &notifiers)?;
        let (msg_rxs, msg_routes) = Self::wire_messages(&flat, &notifiers);

        let mut pending = Vec::with_capacity(n);
        for (((idx, input_slots), output_slots), (msg_rx, routes)) in (0..n)
            .zip(inputs)
            .zip(outputs)
            .zip(msg_rxs.into_iter().zip(msg_routes))
        {
            let name = flat.blocks[idx].name.clone();
            pending.push(BlockExecutor {
                name: name.clone(),
                block: Arc::clone(&flat.blocks[idx].block),
                block_id: BlockId(idx as u32),
                inputs: densify(input_slots, &name, "input")?,
                outputs: densify(output_slots, &name, "output")?,
                msg_rx,
                msg_routes: routes,
                notifier: Arc::clone(&notifiers[idx]),
                ctx: self.ctx.clone(),
            });
            tracing::trace!(block = %name, state = ?BlockState::Created, "executor built");
        }

        let mut handles = Vec::with_capacity(n);
        for exec in pending {
            let name = exec.name.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("blk-{name}"))
                .spawn(move || exec.run());
            match spawned {
                Ok(handle) => handles.push((name, handle)),
                Err(source) => {
                    // Unwind the partial launch before reporting.
                    self.ctx.request_pause();
                    self.join_all(handles);
                    return Err(RuntimeError::Spawn {
                        block: name,
                        source,
                    });
                }
            }
        }
        Ok(handles)
    }

    /// One buffer per producing port; cached buffers are reclaimed when the
    /// connection is untouched since the last launch.
    #[allow(clippy::type_complexity)]
    fn wire_buffers(
        &mut self,
        flat: &FlatGraph,
        notifiers: &[Arc<Notifier>],
    ) -> Result<(
        Vec<Vec<Option<BufferReader>>>,
        Vec<Vec<Option<BufferWriter>>>,
    )> {
        let mut inputs: Vec<Vec<Option<BufferReader>>> = flat
            .blocks
            .iter()
            .map(|b| (0..b.input_sig.max_ports).map(|_| None).collect())
            .collect();
        let mut outputs: Vec<Vec<Option<BufferWriter>>> = flat
            .blocks
            .iter()
            .map(|b| (0..b.output_sig.max_ports).map(|_| None).collect())
            .collect();

        let mut groups: BTreeMap<(usize, usize), Vec<(usize, usize)>> = BTreeMap::new();
        for e in &flat.stream_edges {
            groups
                .entry((e.src, e.src_port))
                .or_default()
                .push((e.dst, e.dst_port));
        }

        let mut next_cache = HashMap::new();
        for ((src, src_port), mut dsts) in groups {
            // Registration order must be reproducible across launches so
            // reclaimed cursors land on the same consumers.
            dsts.sort_unstable_by_key(|&(dst, port)| (flat.block_key(dst), port));
            let item_size = flat.blocks[src].output_sig.item_size;
            let key = BufferKey {
                src: flat.block_key(src),
                src_port,
                dsts: dsts
                    .iter()
                    .map(|&(dst, port)| (flat.block_key(dst), port))
                    .collect(),
                item_size,
            };

            let (buffer, readers) = match self.cache.remove(&key) {
                Some(buffer) => {
                    let readers = buffer.reclaim_readers();
                    (buffer, readers)
                }
                None => {
                    let buffer = StreamBuffer::allocate(item_size, self.ctx.buffer_capacity())?;
                    let readers = dsts.iter().map(|_| buffer.add_reader()).collect();
                    (buffer, readers)
                }
            };

            buffer.set_producer_notifier(Arc::clone(&notifiers[src]));
            outputs[src][src_port] = Some(buffer.writer());
            for (&(dst, dst_port), reader) in dsts.iter().zip(readers) {
                reader.set_notifier(Arc::clone(&notifiers[dst]));
                inputs[dst][dst_port] = Some(reader);
            }
            next_cache.insert(key, buffer);
        }
        // Buffers for connections that no longer exist are dropped here,
        // discarding their in-flight items.
        self.cache = next_cache;
        Ok((inputs, outputs))
    }

    /// One inbox per message-receiving block; one route per message edge.
    #[allow(clippy::type_complexity)]
    fn wire_messages(
        flat: &FlatGraph,
        notifiers: &[Arc<Notifier>],
    ) -> (
        Vec<Option<Receiver<(usize, Value)>>>,
        Vec<Vec<Vec<MessageRoute>>>,
    ) {
        let n = flat.blocks.len();
        let mut senders: Vec<Option<Sender<(usize, Value)>>> = vec![None; n];
        let mut receivers: Vec<Option<Receiver<(usize, Value)>>> = vec![None; n];
        for e in &flat.msg_edges {
            if senders[e.dst].is_none() {
                let (tx, rx) = crossbeam_channel::unbounded();
                senders[e.dst] = Some(tx);
                receivers[e.dst] = Some(rx);
            }
        }
        let mut routes: Vec<Vec<Vec<MessageRoute>>> = (0..n).map(|_| Vec::new()).collect();
        for e in &flat.msg_edges {
            let per_port = &mut routes[e.src];
            if per_port.len() <= e.src_port {
                per_port.resize_with(e.src_port + 1, Vec::new);
            }
            per_port[e.src_port].push(MessageRoute {
                dst_port: e.dst_port,
                sender: senders[e.dst].clone().expect("inbox created above"),
                notifier: Arc::clone(&notifiers[e.dst]),
            });
        }
        (receivers, routes)
    }
}

impl Drop for TopBlock {
    fn drop(&mut self) {
        if let RunState::Running(handles) = std::mem::replace(&mut self.state, RunState::Idle) {
            self.ctx.request_stop();
            self.join_all(handles);
        }
    }
}

/// Collapses the per-port option table into the dense endpoint vector an
/// executor needs: connected ports must be contiguous from port zero.
fn densify<T>(
    slots: Vec<Option<T>>,
    block: &str,
    direction: &'static str,
) -> Result<Vec<T>> {
    let mut endpoints = Vec::new();
    let mut gap = None;
    for (port, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(endpoint) => {
                if let Some(missing) = gap {
                    return Err(RuntimeError::UnconnectedPort {
                        block: block.to_owned(),
                        direction,
                        port: missing,
                    });
                }
                endpoints.push(endpoint);
            }
            None => gap = gap.or(Some(port)),
        }
    }
    Ok(endpoints)
}
