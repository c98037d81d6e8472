//! Per-block scheduling loop.
//!
//! Every leaf block gets one [`BlockExecutor`] running on its own thread.
//! The loop snapshots buffer state, asks the block's `forecast()` whether a
//! `work()` call is worthwhile, hands the block contiguous views, then
//! settles the accounting: publish produced items, advance read cursors,
//! propagate tags, route posted messages. When nothing can move, the
//! executor parks on its [`Notifier`] until a neighbour changes buffer
//! state.
//!
//! Blocking is edge-directed: an executor only ever waits for its direct
//! upstream producers or downstream consumers, so termination and progress
//! follow the acyclic graph structure.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::block::{BlockState, StreamInput, StreamOutput, WorkIo};
use crate::buffer::{BufferReader, BufferWriter, Notifier};
use crate::context::RuntimeContext;
use crate::error::{RuntimeError, WorkError};
use crate::graph::{BlockId, SharedBlock};
use crate::tag::{Tag, TagPropagation, Value};

/// Where messages posted on one output port go.
pub(crate) struct MessageRoute {
    /// Port index at the destination block.
    pub dst_port: usize,
    /// The destination executor's inbox.
    pub sender: crossbeam_channel::Sender<(usize, Value)>,
    /// Wakes the destination executor after a send.
    pub notifier: Arc<Notifier>,
}

/// Outcome of one scheduling iteration.
enum Progress {
    /// The block consumed, produced, or posted something.
    Worked,
    /// Nothing could move; park until buffer state changes.
    Blocked(BlockState),
    /// End-of-stream reached and drained; the executor exits.
    Done,
}

/// One block's runtime state: endpoints, inbox, and control handles.
pub(crate) struct BlockExecutor {
    pub name: String,
    pub block: SharedBlock,
    /// Identity stamped on tags this block emits.
    pub block_id: BlockId,
    pub inputs: Vec<BufferReader>,
    pub outputs: Vec<BufferWriter>,
    /// Message inbox, present when any message edge targets this block.
    pub msg_rx: Option<Receiver<(usize, Value)>>,
    /// Message routes per output port.
    pub msg_routes: Vec<Vec<MessageRoute>>,
    pub notifier: Arc<Notifier>,
    pub ctx: RuntimeContext,
}

impl BlockExecutor {
    /// The scheduling loop. Consumes the executor; runs until end-of-stream,
    /// graceful stop, pause, or a fatal block error.
    pub(crate) fn run(self) {
        tracing::debug!(block = %self.name, state = ?BlockState::Ready, "executor start");
        loop {
            // Snapshot before any check so a notification arriving between
            // the availability computation and the park is never lost.
            let seen = self.notifier.generation();

            if self.ctx.is_paused() {
                // lock() or a fatal error elsewhere: leave buffered data and
                // end-of-stream flags untouched.
                tracing::debug!(block = %self.name, "executor paused");
                return;
            }
            if self.ctx.is_stopped() && self.inputs.is_empty() {
                // Graceful stop: sources quit producing, everyone downstream
                // keeps draining until their upstream finishes.
                break;
            }

            if let Err(err) = self.deliver_messages() {
                self.fail(err);
                return;
            }

            match self.iteration() {
                Ok(Progress::Worked) => {
                    tracing::trace!(block = %self.name, state = ?BlockState::Running, "worked");
                }
                Ok(Progress::Blocked(state)) => {
                    tracing::trace!(block = %self.name, ?state, "executor parked");
                    self.notifier.wait_past(seen);
                }
                Ok(Progress::Done) => break,
                Err(err) => {
                    self.fail(err);
                    return;
                }
            }
        }
        // Permanent exit: release upstream space and propagate
        // end-of-stream downstream. Paused executors skip this.
        for reader in &self.inputs {
            reader.detach();
        }
        for writer in &self.outputs {
            writer.finish();
        }
        tracing::debug!(block = %self.name, state = ?BlockState::Done, "executor done");
    }

    fn fail(&self, err: WorkError) {
        tracing::error!(block = %self.name, error = %err, "block failed");
        self.ctx.set_fatal(RuntimeError::Block {
            block: self.name.clone(),
            source: err,
        });
    }

    fn deliver_messages(&self) -> Result<(), WorkError> {
        let Some(rx) = &self.msg_rx else {
            return Ok(());
        };
        while let Ok((port, msg)) = rx.try_recv() {
            let mut block = self.block.lock().expect("block poisoned");
            block.handle_message(port, msg)?;
        }
        Ok(())
    }

    /// One attempt to run `work()`: snapshot availability, check the
    /// forecast, build views, call the block, settle accounting.
    fn iteration(&self) -> Result<Progress, WorkError> {
        let mut block = self.block.lock().expect("block poisoned");
        let quantum = self.ctx.work_quantum();

        let navail: Vec<usize> = self
            .inputs
            .iter()
            .map(BufferReader::items_available)
            .collect();
        let fin: Vec<bool> = self
            .inputs
            .iter()
            .map(BufferReader::producer_finished)
            .collect();

        // Every upstream finished and drained: nothing will ever arrive.
        if !self.inputs.is_empty() && navail.iter().zip(&fin).all(|(&n, &f)| n == 0 && f) {
            return Ok(Progress::Done);
        }

        // Every downstream consumer is gone: nothing produced here can ever
        // be read again.
        if !self.outputs.is_empty()
            && self
                .outputs
                .iter()
                .all(|w| w.buffer().attached_reader_count() == 0)
        {
            return Ok(Progress::Done);
        }

        let space = self
            .outputs
            .iter()
            .map(BufferWriter::space_available)
            .min();
        if space == Some(0) {
            return Ok(Progress::Blocked(BlockState::BlockedOnOutput));
        }

        // Shrink the output request until the forecast fits what the
        // tightest live input port can offer. Ports whose producer already
        // finished are exempt: they hand over whatever remains, possibly a
        // partial final chunk.
        let mut noutput = space.unwrap_or(quantum).min(quantum);
        let tight = navail
            .iter()
            .zip(&fin)
            .filter(|&(_, &f)| !f)
            .map(|(&n, _)| n)
            .min();
        if let Some(avail) = tight {
            noutput = noutput.min(avail.max(1));
            while block.forecast(noutput).max(1) > avail {
                if noutput == 1 {
                    return Ok(Progress::Blocked(BlockState::BlockedOnInput));
                }
                noutput /= 2;
            }
        }

        let in_offsets: Vec<u64> = self.inputs.iter().map(BufferReader::abs_offset).collect();
        let out_offsets: Vec<u64> = self.outputs.iter().map(BufferWriter::abs_offset).collect();
        let tags_in: Vec<Vec<Tag>> = self
            .inputs
            .iter()
            .zip(&navail)
            .map(|(r, &n)| r.tags(n))
            .collect();

        let in_regions: Vec<_> = self.inputs.iter().map(BufferReader::read_region).collect();
        let mut out_regions: Vec<_> = self.outputs.iter().map(BufferWriter::write_region).collect();

        let mut io = WorkIo {
            inputs: in_regions
                .iter()
                .enumerate()
                .map(|(i, region)| {
                    let isz = self.inputs[i].buffer().item_size();
                    // Clamp to the snapshot so the view matches `tags_in`.
                    let bytes = &region.as_slice()[..navail[i] * isz];
                    StreamInput::new(bytes, isz, in_offsets[i], tags_in[i].clone(), fin[i])
                })
                .collect(),
            outputs: out_regions
                .iter_mut()
                .enumerate()
                .map(|(j, region)| {
                    let isz = self.outputs[j].buffer().item_size();
                    let full = region.as_mut_slice();
                    let cap = (full.len() / isz).min(noutput);
                    StreamOutput::new(&mut full[..cap * isz], isz, out_offsets[j], self.block_id)
                })
                .collect(),
            finished: false,
            posted: Vec::new(),
        };

        block.work(&mut io)?;

        let finished = io.finished;
        let posted = std::mem::take(&mut io.posted);
        let consumed: Vec<usize> = io.inputs.iter().map(StreamInput::consumed).collect();
        let produced: Vec<usize> = io.outputs.iter().map(StreamOutput::produced).collect();
        let mut out_tags: Vec<Vec<Tag>> = io
            .outputs
            .iter_mut()
            .map(StreamOutput::take_pending_tags)
            .collect();
        drop(io);
        drop(out_regions);
        drop(in_regions);

        let rate = block.relative_rate();
        match block.tag_propagation() {
            TagPropagation::Manual => {}
            TagPropagation::OneToOne => {
                for i in 0..self.inputs.len().min(self.outputs.len()) {
                    map_tags(
                        &tags_in[i],
                        consumed[i],
                        in_offsets[i],
                        out_offsets[i],
                        rate,
                        &mut out_tags[i],
                    );
                }
            }
            TagPropagation::AllToAll => {
                for i in 0..self.inputs.len() {
                    for j in 0..self.outputs.len() {
                        map_tags(
                            &tags_in[i],
                            consumed[i],
                            in_offsets[i],
                            out_offsets[j],
                            rate,
                            &mut out_tags[j],
                        );
                    }
                }
            }
        }

        for (j, writer) in self.outputs.iter().enumerate() {
            writer
                .publish(produced[j], std::mem::take(&mut out_tags[j]))
                .map_err(|e| WorkError::Fatal(e.to_string()))?;
        }
        for (i, reader) in self.inputs.iter().enumerate() {
            reader.consume(consumed[i]);
        }

        let moved = !posted.is_empty()
            || consumed.iter().any(|&c| c > 0)
            || produced.iter().any(|&p| p > 0);

        for (port, msg) in posted {
            let Some(routes) = self.msg_routes.get(port) else {
                continue;
            };
            for route in routes {
                // A closed inbox means the destination already exited.
                let _ = route.sender.send((route.dst_port, msg.clone()));
                route.notifier.notify();
            }
        }

        if finished {
            return Ok(Progress::Done);
        }
        if moved {
            return Ok(Progress::Worked);
        }
        if self.inputs.is_empty() {
            // A source that produced nothing despite free space is waiting
            // on something external (a message, typically).
            return Ok(Progress::Blocked(BlockState::BlockedOnOutput));
        }
        // No progress although the forecast was satisfied: the block is
        // starved behind a finished upstream and never will be satisfied.
        let starved = fin.iter().all(|&f| f)
            || navail.iter().zip(&fin).any(|(&n, &f)| f && n == 0);
        if starved {
            return Ok(Progress::Done);
        }
        Ok(Progress::Blocked(BlockState::BlockedOnInput))
    }
}

/// Maps the tags inside the consumed window of one input onto one output,
/// scaling the relative offset by the block's rate.
fn map_tags(
    tags: &[Tag],
    consumed: usize,
    in_base: u64,
    out_base: u64,
    rate: f64,
    out: &mut Vec<Tag>,
) {
    for tag in tags {
        // Sorted ascending; everything past the consumed window stays in
        // the store for the next call.
        if tag.offset >= in_base + consumed as u64 {
            break;
        }
        let delta = ((tag.offset - in_base) as f64 * rate).floor() as u64;
        let mut mapped = tag.clone();
        mapped.offset = out_base + delta;
        out.push(mapped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, IoSignature};
    use crate::buffer::StreamBuffer;
    use crate::tag::Value;

    struct Doubler;

    impl Block for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }
        fn input_signature(&self) -> IoSignature {
            IoSignature::fixed(1, 4)
        }
        fn output_signature(&self) -> IoSignature {
            IoSignature::fixed(1, 4)
        }
        fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError> {
            let n = io.inputs[0].items().min(io.outputs[0].capacity());
            for k in 0..n {
                let x = io.inputs[0].slice::<f32>()[k];
                io.outputs[0].slice_mut::<f32>()[k] = 2.0 * x;
            }
            io.inputs[0].consume(n);
            io.outputs[0].produce(n);
            Ok(())
        }
    }

    /// 1-in/2-out copy with every input tag mirrored onto both outputs.
    struct Splitter;

    impl Block for Splitter {
        fn name(&self) -> &str {
            "splitter"
        }
        fn input_signature(&self) -> IoSignature {
            IoSignature::fixed(1, 4)
        }
        fn output_signature(&self) -> IoSignature {
            IoSignature::fixed(2, 4)
        }
        fn tag_propagation(&self) -> TagPropagation {
            TagPropagation::AllToAll
        }
        fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError> {
            let n = io.inputs[0]
                .items()
                .min(io.outputs[0].capacity())
                .min(io.outputs[1].capacity());
            let src = io.inputs[0].slice::<f32>();
            io.outputs[0].slice_mut::<f32>()[..n].copy_from_slice(&src[..n]);
            io.outputs[1].slice_mut::<f32>()[..n].copy_from_slice(&src[..n]);
            io.inputs[0].consume(n);
            io.outputs[0].produce(n);
            io.outputs[1].produce(n);
            Ok(())
        }
    }

    /// 1:1 copy that drops upstream tags and stamps its own instead.
    struct Stamper;

    impl Block for Stamper {
        fn name(&self) -> &str {
            "stamper"
        }
        fn input_signature(&self) -> IoSignature {
            IoSignature::fixed(1, 4)
        }
        fn output_signature(&self) -> IoSignature {
            IoSignature::fixed(1, 4)
        }
        fn tag_propagation(&self) -> TagPropagation {
            TagPropagation::Manual
        }
        fn work(&mut self, io: &mut WorkIo) -> Result<(), WorkError> {
            let n = io.inputs[0].items().min(io.outputs[0].capacity());
            let src = io.inputs[0].slice::<f32>();
            io.outputs[0].slice_mut::<f32>()[..n].copy_from_slice(&src[..n]);
            if n > 0 {
                io.outputs[0].add_tag(0, "stamp", Value::Null);
            }
            io.inputs[0].consume(n);
            io.outputs[0].produce(n);
            Ok(())
        }
    }

    fn executor_for(block: Box<dyn Block>, inputs: Vec<BufferReader>, outputs: Vec<BufferWriter>) -> BlockExecutor {
        let name = block.name().to_owned();
        BlockExecutor {
            name,
            block: std::sync::Arc::new(std::sync::Mutex::new(block)),
            block_id: BlockId(0),
            inputs,
            outputs,
            msg_rx: None,
            msg_routes: Vec::new(),
            notifier: Notifier::new(),
            ctx: RuntimeContext::new(),
        }
    }

    fn feed(writer: &BufferWriter, samples: &[f32], tags: Vec<Tag>) {
        let bytes: &[u8] = bytemuck::cast_slice(samples);
        let mut region = writer.write_region();
        region.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
        drop(region);
        writer.publish(samples.len(), tags).unwrap();
    }

    #[test]
    fn iteration_moves_data_and_reports_progress() {
        let upstream = StreamBuffer::allocate(4, 16).unwrap();
        let downstream = StreamBuffer::allocate(4, 16).unwrap();
        let feeder = upstream.writer();
        let exec = executor_for(
            Box::new(Doubler),
            vec![upstream.add_reader()],
            vec![downstream.writer()],
        );
        let tap = downstream.add_reader();

        // Nothing to do yet.
        assert!(matches!(exec.iteration(), Ok(Progress::Blocked(_))));

        feed(&feeder, &[1.0, 2.0, 3.0], Vec::new());
        assert!(matches!(exec.iteration(), Ok(Progress::Worked)));

        let region = tap.read_region();
        let out: &[f32] = bytemuck::cast_slice(region.as_slice());
        assert_eq!(out, &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn finished_and_drained_upstream_means_done() {
        let upstream = StreamBuffer::allocate(4, 16).unwrap();
        let downstream = StreamBuffer::allocate(4, 16).unwrap();
        let feeder = upstream.writer();
        let exec = executor_for(
            Box::new(Doubler),
            vec![upstream.add_reader()],
            vec![downstream.writer()],
        );
        let _tap = downstream.add_reader();

        feed(&feeder, &[5.0], Vec::new());
        feeder.finish();

        // One partial chunk, then end-of-stream.
        assert!(matches!(exec.iteration(), Ok(Progress::Worked)));
        assert!(matches!(exec.iteration(), Ok(Progress::Done)));
    }

    #[test]
    fn tags_ride_along_one_to_one() {
        let upstream = StreamBuffer::allocate(4, 16).unwrap();
        let downstream = StreamBuffer::allocate(4, 16).unwrap();
        let feeder = upstream.writer();
        let exec = executor_for(
            Box::new(Doubler),
            vec![upstream.add_reader()],
            vec![downstream.writer()],
        );
        let tap = downstream.add_reader();

        let tag = Tag::new(2, "burst", Value::Bool(true), BlockId(7));
        feed(&feeder, &[0.0, 0.0, 0.0, 0.0], vec![tag]);
        assert!(matches!(exec.iteration(), Ok(Progress::Worked)));

        let seen = tap.tags(4);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].offset, 2);
        assert_eq!(seen[0].key, "burst");
    }

    #[test]
    fn all_to_all_copies_tags_onto_every_output() {
        let upstream = StreamBuffer::allocate(4, 16).unwrap();
        let down_a = StreamBuffer::allocate(4, 16).unwrap();
        let down_b = StreamBuffer::allocate(4, 16).unwrap();
        let feeder = upstream.writer();
        let exec = executor_for(
            Box::new(Splitter),
            vec![upstream.add_reader()],
            vec![down_a.writer(), down_b.writer()],
        );
        let tap_a = down_a.add_reader();
        let tap_b = down_b.add_reader();

        let tag = Tag::new(2, "frame", Value::Int(1), BlockId(5));
        feed(&feeder, &[1.0, 2.0, 3.0], vec![tag]);
        assert!(matches!(exec.iteration(), Ok(Progress::Worked)));

        for tap in [&tap_a, &tap_b] {
            let seen = tap.tags(3);
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].offset, 2);
            assert_eq!(seen[0].key, "frame");
        }
    }

    #[test]
    fn manual_policy_leaves_tag_movement_to_the_block() {
        let upstream = StreamBuffer::allocate(4, 16).unwrap();
        let downstream = StreamBuffer::allocate(4, 16).unwrap();
        let feeder = upstream.writer();
        let exec = executor_for(
            Box::new(Stamper),
            vec![upstream.add_reader()],
            vec![downstream.writer()],
        );
        let tap = downstream.add_reader();

        let tag = Tag::new(1, "upstream", Value::Null, BlockId(3));
        feed(&feeder, &[1.0, 2.0, 3.0], vec![tag]);
        assert!(matches!(exec.iteration(), Ok(Progress::Worked)));

        // Only the block's own tag arrives; the consumed input tag is not
        // re-copied on top of it.
        let seen = tap.tags(3);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key, "stamp");
        assert_eq!(seen[0].offset, 0);
    }

    #[test]
    fn run_finishes_downstream_after_draining() {
        let upstream = StreamBuffer::allocate(4, 16).unwrap();
        let downstream = StreamBuffer::allocate(4, 16).unwrap();
        let feeder = upstream.writer();
        let exec = executor_for(
            Box::new(Doubler),
            vec![upstream.add_reader()],
            vec![downstream.writer()],
        );
        let tap = downstream.add_reader();

        feed(&feeder, &[1.0, 2.0], Vec::new());
        feeder.finish();
        exec.run();

        assert!(tap.producer_finished());
        let region = tap.read_region();
        let out: &[f32] = bytemuck::cast_slice(region.as_slice());
        assert_eq!(out, &[2.0, 4.0]);
    }

    #[test]
    fn full_output_blocks_instead_of_overwriting() {
        let upstream = StreamBuffer::allocate(4, 16).unwrap();
        let downstream = StreamBuffer::allocate(4, 2).unwrap();
        let feeder = upstream.writer();
        let exec = executor_for(
            Box::new(Doubler),
            vec![upstream.add_reader()],
            vec![downstream.writer()],
        );
        let tap = downstream.add_reader();

        feed(&feeder, &[1.0, 2.0, 3.0, 4.0], Vec::new());
        assert!(matches!(exec.iteration(), Ok(Progress::Worked)));
        // Downstream ring (2 items) is full and untouched by the reader.
        assert!(matches!(
            exec.iteration(),
            Ok(Progress::Blocked(BlockState::BlockedOnOutput))
        ));

        tap.consume(2);
        assert!(matches!(exec.iteration(), Ok(Progress::Worked)));
        let region = tap.read_region();
        let out: &[f32] = bytemuck::cast_slice(region.as_slice());
        assert_eq!(out, &[6.0, 8.0]);
    }
}
