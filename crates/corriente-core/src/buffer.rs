//! Single-producer / multi-consumer circular stream buffers.
//!
//! A [`StreamBuffer`] sits on every stream connection: the producing block
//! writes items through its [`BufferWriter`], each consuming block reads
//! through its own [`BufferReader`] cursor. Cursors are absolute item counts
//! since stream start, published through atomics; the writer never laps the
//! slowest reader.
//!
//! # Wrap-around without copies
//!
//! The byte region is allocated at twice the ring capacity and kept mirrored
//! (`data[i + cap] == data[i]` for every `i < cap`). Any view of at most
//! `capacity` items starting anywhere in the ring is therefore physically
//! contiguous — a logical wrap never splits a slice or forces a copy on the
//! read side. This is the safe-Rust equivalent of the classic double-mapped
//! buffer; the producer pays for it by mirroring the bytes it publishes.
//!
//! # Synchronization
//!
//! Cursor handoff is atomic (release on publish/consume, acquire on query).
//! The byte region itself sits behind an `RwLock`: consumers take shared
//! guards for the duration of a `work()` call, the producer takes an
//! exclusive guard while filling and mirroring its region. Guard acquisition
//! only ever follows flow-graph edges downstream, so an acyclic graph cannot
//! deadlock. Waiting is done on a [`Notifier`] per executor, never by
//! spinning.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, RwLockReadGuard};

use crate::error::RuntimeError;
use crate::tag::{Tag, TagStore};

/// Condition-variable wakeup with a generation counter.
///
/// An executor snapshots [`generation()`](Self::generation) before computing
/// buffer availability; if it then decides to block, [`wait_past()`]
/// (Self::wait_past) returns immediately when any notification arrived in
/// between, closing the lost-wakeup window.
#[derive(Debug, Default)]
pub struct Notifier {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl Notifier {
    /// Creates a shareable notifier.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current generation count.
    pub fn generation(&self) -> u64 {
        *self.generation.lock().expect("notifier poisoned")
    }

    /// Bumps the generation and wakes every waiter.
    pub fn notify(&self) {
        let mut generation = self.generation.lock().expect("notifier poisoned");
        *generation += 1;
        self.condvar.notify_all();
    }

    /// Blocks until the generation moves past `seen`.
    pub fn wait_past(&self, seen: u64) {
        let mut generation = self.generation.lock().expect("notifier poisoned");
        while *generation == seen {
            generation = self
                .condvar
                .wait(generation)
                .expect("notifier poisoned");
        }
    }
}

/// Per-consumer cursor state.
#[derive(Debug)]
struct ReaderState {
    /// Absolute items consumed by this reader.
    pos: AtomicU64,
    /// A detached reader's executor has exited; it no longer gates the
    /// producer and never will again.
    detached: AtomicBool,
    /// Executor to wake when the producer publishes. Rebound on every run.
    notifier: Mutex<Option<Arc<Notifier>>>,
}

/// A circular byte buffer connecting one producer to N consumers.
///
/// Constructed by [`allocate()`](Self::allocate); endpoints are handed out
/// via [`writer()`](Self::writer) and [`add_reader()`](Self::add_reader).
/// The buffer owns the [`TagStore`] for its stream.
#[derive(Debug)]
pub struct StreamBuffer {
    item_size: usize,
    capacity: usize,
    /// `2 * capacity * item_size` bytes, mirrored halves. Backed by `u64`
    /// words so every view is 8-byte aligned at its base; item offsets are
    /// multiples of the item size, which keeps typed casts (alignment up to
    /// 8) panic-free.
    data: RwLock<Vec<u64>>,
    /// Absolute items published.
    write_pos: AtomicU64,
    /// Producer will never publish again.
    finished: AtomicBool,
    readers: RwLock<Vec<Arc<ReaderState>>>,
    producer_notifier: Mutex<Option<Arc<Notifier>>>,
    tags: TagStore,
}

impl StreamBuffer {
    /// Allocates a buffer for `capacity_items` items of `item_size` bytes.
    ///
    /// Fails with [`RuntimeError::Allocation`] on zero sizes or when the
    /// doubled byte size overflows.
    pub fn allocate(item_size: usize, capacity_items: usize) -> Result<Arc<Self>, RuntimeError> {
        let err = RuntimeError::Allocation {
            item_size,
            capacity_items,
        };
        if item_size == 0 || capacity_items == 0 {
            return Err(err);
        }
        let Some(bytes) = capacity_items
            .checked_mul(item_size)
            .and_then(|b| b.checked_mul(2))
        else {
            return Err(err);
        };
        Ok(Arc::new(Self {
            item_size,
            capacity: capacity_items,
            data: RwLock::new(vec![0u64; bytes.div_ceil(8)]),
            write_pos: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            readers: RwLock::new(Vec::new()),
            producer_notifier: Mutex::new(None),
            tags: TagStore::new(),
        }))
    }

    /// Item size in bytes.
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Ring capacity in items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of registered consumers.
    pub fn reader_count(&self) -> usize {
        self.readers.read().expect("reader list poisoned").len()
    }

    /// The producer endpoint. Exactly one producer may use it at a time.
    pub fn writer(self: &Arc<Self>) -> BufferWriter {
        BufferWriter {
            buf: Arc::clone(self),
        }
    }

    /// Registers a new consumer cursor, starting at the current write
    /// position. Must happen before executors run.
    pub fn add_reader(self: &Arc<Self>) -> BufferReader {
        let state = Arc::new(ReaderState {
            pos: AtomicU64::new(self.write_pos.load(Ordering::Acquire)),
            detached: AtomicBool::new(false),
            notifier: Mutex::new(None),
        });
        let mut readers = self.readers.write().expect("reader list poisoned");
        readers.push(Arc::clone(&state));
        BufferReader {
            buf: Arc::clone(self),
            state,
        }
    }

    /// Rebuilds consumer handles for the already-registered cursors, in
    /// registration order. Used when a paused run resumes with the same
    /// topology: cursor positions and buffered items carry over.
    pub(crate) fn reclaim_readers(self: &Arc<Self>) -> Vec<BufferReader> {
        let readers = self.readers.read().expect("reader list poisoned");
        readers
            .iter()
            .map(|state| {
                state.detached.store(false, Ordering::Release);
                BufferReader {
                    buf: Arc::clone(self),
                    state: Arc::clone(state),
                }
            })
            .collect()
    }

    /// Consumers whose executor is still alive.
    pub(crate) fn attached_reader_count(&self) -> usize {
        let readers = self.readers.read().expect("reader list poisoned");
        readers
            .iter()
            .filter(|r| !r.detached.load(Ordering::Acquire))
            .count()
    }

    /// Binds the executor notifier woken when consumers free space.
    pub fn set_producer_notifier(&self, notifier: Arc<Notifier>) {
        *self.producer_notifier.lock().expect("notifier slot poisoned") = Some(notifier);
    }

    fn min_read_pos(&self) -> u64 {
        let readers = self.readers.read().expect("reader list poisoned");
        readers
            .iter()
            .filter(|r| !r.detached.load(Ordering::Acquire))
            .map(|r| r.pos.load(Ordering::Acquire))
            .min()
            .unwrap_or_else(|| self.write_pos.load(Ordering::Acquire))
    }

    fn notify_readers(&self) {
        let readers = self.readers.read().expect("reader list poisoned");
        for reader in readers.iter() {
            if let Some(n) = reader.notifier.lock().expect("notifier slot poisoned").as_ref() {
                n.notify();
            }
        }
    }

    fn notify_producer(&self) {
        if let Some(n) = self
            .producer_notifier
            .lock()
            .expect("notifier slot poisoned")
            .as_ref()
        {
            n.notify();
        }
    }

    /// Restores the mirror invariant for the byte range
    /// `[start, start + len)` of the doubled region.
    fn mirror(data: &mut [u8], cap_bytes: usize, start: usize, len: usize) {
        let (lo, hi) = data.split_at_mut(cap_bytes);
        let end = start + len;
        let first_end = end.min(cap_bytes);
        if start < first_end {
            hi[start..first_end].copy_from_slice(&lo[start..first_end]);
        }
        if end > cap_bytes {
            let wrapped = end - cap_bytes;
            lo[..wrapped].copy_from_slice(&hi[..wrapped]);
        }
    }
}

/// Producer endpoint of a [`StreamBuffer`].
#[derive(Debug)]
pub struct BufferWriter {
    buf: Arc<StreamBuffer>,
}

impl BufferWriter {
    /// Free items the producer may write without lapping the slowest reader.
    pub fn space_available(&self) -> usize {
        let w = self.buf.write_pos.load(Ordering::Acquire);
        let r = self.buf.min_read_pos();
        self.buf.capacity - (w - r) as usize
    }

    /// Absolute item offset of the next item to be written.
    pub fn abs_offset(&self) -> u64 {
        self.buf.write_pos.load(Ordering::Acquire)
    }

    /// A contiguous writable view over all currently free space.
    ///
    /// Holds the region lock exclusively until dropped; consumers taking
    /// views block for that duration.
    pub fn write_region(&self) -> WriteRegion<'_> {
        let w = self.buf.write_pos.load(Ordering::Acquire);
        let space = self.space_available();
        let isz = self.buf.item_size;
        let start = (w % self.buf.capacity as u64) as usize * isz;
        WriteRegion {
            guard: self.buf.data.write().expect("buffer region poisoned"),
            start,
            len: space * isz,
        }
    }

    /// Publishes `n_items` previously written into the region, attaches
    /// `tags`, and wakes consumers.
    ///
    /// Fails with [`RuntimeError::Overflow`] if `n_items` exceeds the free
    /// space — a precondition violation, since callers are expected to check
    /// [`space_available()`](Self::space_available) first.
    pub fn publish(&self, n_items: usize, tags: Vec<Tag>) -> Result<(), RuntimeError> {
        let space = self.space_available();
        if n_items > space {
            return Err(RuntimeError::Overflow {
                requested: n_items,
                available: space,
            });
        }
        if n_items > 0 {
            let isz = self.buf.item_size;
            let cap_bytes = self.buf.capacity * isz;
            let w = self.buf.write_pos.load(Ordering::Acquire);
            let start = (w % self.buf.capacity as u64) as usize * isz;
            {
                let mut data = self.buf.data.write().expect("buffer region poisoned");
                let bytes = bytemuck::cast_slice_mut::<u64, u8>(data.as_mut_slice());
                StreamBuffer::mirror(bytes, cap_bytes, start, n_items * isz);
            }
        }
        for tag in tags {
            self.buf.tags.add(tag);
        }
        if n_items > 0 {
            self.buf
                .write_pos
                .fetch_add(n_items as u64, Ordering::Release);
        }
        self.buf.notify_readers();
        Ok(())
    }

    /// Marks end-of-stream: the producer will never publish again.
    pub fn finish(&self) {
        self.buf.finished.store(true, Ordering::Release);
        self.buf.notify_readers();
    }

    /// Whether end-of-stream has been marked.
    pub fn is_finished(&self) -> bool {
        self.buf.finished.load(Ordering::Acquire)
    }

    /// The underlying buffer.
    pub fn buffer(&self) -> &Arc<StreamBuffer> {
        &self.buf
    }
}

/// Consumer endpoint of a [`StreamBuffer`]; owns one read cursor.
#[derive(Debug)]
pub struct BufferReader {
    buf: Arc<StreamBuffer>,
    state: Arc<ReaderState>,
}

impl BufferReader {
    /// Items published but not yet consumed by this reader.
    pub fn items_available(&self) -> usize {
        let w = self.buf.write_pos.load(Ordering::Acquire);
        let r = self.state.pos.load(Ordering::Acquire);
        (w - r) as usize
    }

    /// Absolute item offset of this reader's cursor.
    pub fn abs_offset(&self) -> u64 {
        self.state.pos.load(Ordering::Acquire)
    }

    /// Whether the producer has marked end-of-stream. Items may still be
    /// pending; check [`items_available()`](Self::items_available).
    pub fn producer_finished(&self) -> bool {
        self.buf.finished.load(Ordering::Acquire)
    }

    /// A contiguous read-only view over all currently available items.
    pub fn read_region(&self) -> ReadRegion<'_> {
        let avail = self.items_available();
        let isz = self.buf.item_size;
        let start = (self.abs_offset() % self.buf.capacity as u64) as usize * isz;
        ReadRegion {
            guard: self.buf.data.read().expect("buffer region poisoned"),
            start,
            len: avail * isz,
        }
    }

    /// Tags attached within the next `n_items` items at this cursor.
    pub fn tags(&self, n_items: usize) -> Vec<Tag> {
        let r = self.abs_offset();
        self.buf.tags.range(r, r + n_items as u64)
    }

    /// Advances this cursor by `n_items`, garbage-collects tags every reader
    /// has passed, and wakes the producer.
    pub fn consume(&self, n_items: usize) {
        debug_assert!(n_items <= self.items_available());
        if n_items == 0 {
            return;
        }
        self.state
            .pos
            .fetch_add(n_items as u64, Ordering::Release);
        self.buf.tags.prune(self.buf.min_read_pos());
        self.buf.notify_producer();
    }

    /// Permanently removes this cursor from space accounting and wakes the
    /// producer. Called when the consuming executor exits for good.
    pub fn detach(&self) {
        self.state.detached.store(true, Ordering::Release);
        self.buf.notify_producer();
    }

    /// Binds the executor notifier woken when the producer publishes or
    /// finishes.
    pub fn set_notifier(&self, notifier: Arc<Notifier>) {
        *self
            .state
            .notifier
            .lock()
            .expect("notifier slot poisoned") = Some(notifier);
    }

    /// The underlying buffer.
    pub fn buffer(&self) -> &Arc<StreamBuffer> {
        &self.buf
    }
}

/// Exclusive writable view into a buffer's free region.
pub struct WriteRegion<'a> {
    guard: std::sync::RwLockWriteGuard<'a, Vec<u64>>,
    start: usize,
    len: usize,
}

impl WriteRegion<'_> {
    /// The writable bytes, item-aligned, wrap-free.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let bytes = bytemuck::cast_slice_mut::<u64, u8>(self.guard.as_mut_slice());
        &mut bytes[self.start..self.start + self.len]
    }
}

/// Shared read-only view into a buffer's available region.
pub struct ReadRegion<'a> {
    guard: RwLockReadGuard<'a, Vec<u64>>,
    start: usize,
    len: usize,
}

impl ReadRegion<'_> {
    /// The readable bytes, item-aligned, wrap-free.
    pub fn as_slice(&self) -> &[u8] {
        let bytes = bytemuck::cast_slice::<u64, u8>(self.guard.as_slice());
        &bytes[self.start..self.start + self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::BlockId;
    use crate::tag::Value;

    fn fill(writer: &BufferWriter, bytes: &[u8]) {
        let mut region = writer.write_region();
        region.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
        drop(region);
        writer.publish(bytes.len(), Vec::new()).unwrap();
    }

    #[test]
    fn allocate_rejects_zero_sizes() {
        assert!(matches!(
            StreamBuffer::allocate(0, 16),
            Err(RuntimeError::Allocation { .. })
        ));
        assert!(matches!(
            StreamBuffer::allocate(4, 0),
            Err(RuntimeError::Allocation { .. })
        ));
        assert!(matches!(
            StreamBuffer::allocate(usize::MAX, 2),
            Err(RuntimeError::Allocation { .. })
        ));
    }

    #[test]
    fn fifo_roundtrip_single_reader() {
        let buf = StreamBuffer::allocate(1, 8).unwrap();
        let writer = buf.writer();
        let reader = buf.add_reader();

        fill(&writer, &[1, 2, 3]);
        assert_eq!(reader.items_available(), 3);
        assert_eq!(reader.read_region().as_slice(), &[1, 2, 3]);
        reader.consume(2);
        assert_eq!(reader.read_region().as_slice(), &[3]);
        assert_eq!(writer.space_available(), 7);
    }

    #[test]
    fn wrap_around_view_stays_contiguous() {
        let buf = StreamBuffer::allocate(1, 8).unwrap();
        let writer = buf.writer();
        let reader = buf.add_reader();

        // Advance past the physical end: 6 written + consumed, then 5 more.
        fill(&writer, &[0, 1, 2, 3, 4, 5]);
        reader.consume(6);
        fill(&writer, &[6, 7, 8, 9, 10]);

        // Items 6..11 straddle the ring boundary (offsets 6,7,0,1,2) but the
        // view is a single contiguous slice.
        assert_eq!(reader.read_region().as_slice(), &[6, 7, 8, 9, 10]);
    }

    #[test]
    fn publish_beyond_space_is_overflow() {
        let buf = StreamBuffer::allocate(1, 4).unwrap();
        let writer = buf.writer();
        let _reader = buf.add_reader();

        assert!(matches!(
            writer.publish(5, Vec::new()),
            Err(RuntimeError::Overflow { .. })
        ));
    }

    #[test]
    fn slowest_reader_gates_space() {
        let buf = StreamBuffer::allocate(1, 4).unwrap();
        let writer = buf.writer();
        let fast = buf.add_reader();
        let slow = buf.add_reader();

        fill(&writer, &[1, 2, 3, 4]);
        fast.consume(4);
        assert_eq!(writer.space_available(), 0);
        slow.consume(3);
        assert_eq!(writer.space_available(), 3);
    }

    #[test]
    fn tags_visible_in_window_then_pruned() {
        let buf = StreamBuffer::allocate(1, 8).unwrap();
        let writer = buf.writer();
        let reader = buf.add_reader();

        let mut region = writer.write_region();
        region.as_mut_slice()[..4].copy_from_slice(&[9, 9, 9, 9]);
        drop(region);
        let tag = Tag::new(2, "mark", Value::Int(7), BlockId(0));
        writer.publish(4, vec![tag.clone()]).unwrap();

        assert_eq!(reader.tags(4), vec![tag]);
        assert!(reader.tags(2).is_empty());

        reader.consume(3);
        assert!(buf.tags_len_for_test() == 0);
    }

    #[test]
    fn detached_reader_stops_gating_space() {
        let buf = StreamBuffer::allocate(1, 4).unwrap();
        let writer = buf.writer();
        let live = buf.add_reader();
        let dead = buf.add_reader();

        fill(&writer, &[1, 2, 3, 4]);
        live.consume(4);
        assert_eq!(writer.space_available(), 0);

        dead.detach();
        assert_eq!(writer.space_available(), 4);
        assert_eq!(buf.attached_reader_count(), 1);
    }

    #[test]
    fn reclaimed_readers_keep_their_cursors() {
        let buf = StreamBuffer::allocate(1, 8).unwrap();
        let writer = buf.writer();
        let reader = buf.add_reader();
        fill(&writer, &[1, 2, 3]);
        reader.consume(1);
        drop(reader);

        let reclaimed = buf.reclaim_readers();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].items_available(), 2);
        assert_eq!(reclaimed[0].read_region().as_slice(), &[2, 3]);
    }

    #[test]
    fn finish_flag_propagates() {
        let buf = StreamBuffer::allocate(4, 8).unwrap();
        let writer = buf.writer();
        let reader = buf.add_reader();
        assert!(!reader.producer_finished());
        writer.finish();
        assert!(reader.producer_finished());
    }

    #[test]
    fn reader_added_after_data_starts_at_write_cursor() {
        let buf = StreamBuffer::allocate(1, 8).unwrap();
        let writer = buf.writer();
        let early = buf.add_reader();
        fill(&writer, &[1, 2]);
        early.consume(2);
        let late = buf.add_reader();
        assert_eq!(late.items_available(), 0);
        fill(&writer, &[3]);
        assert_eq!(late.read_region().as_slice(), &[3]);
    }

    impl StreamBuffer {
        fn tags_len_for_test(&self) -> usize {
            self.tags.len()
        }
    }
}
