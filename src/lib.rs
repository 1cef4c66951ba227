//! Frame triple buffering in Rust
//!
//! This crate hands a stream of frames from one producer thread (e.g. a video
//! decoder) to one consumer thread (e.g. a renderer) without ever copying
//! them. Three frames are allocated once, and their ownership rotates between
//! a producer slot, a pending slot and a consumer slot.
//!
//! The producer fills its frame in place, then offers it. Offering makes the
//! frame pending and notifies the consumer through a user-provided hook, which
//! must somehow arrange for the consumer to take the frame later on. Taking a
//! frame makes the pending frame the consumer's own until the next take.
//!
//! Two loss policies are available, see [`Options`]. In lossy mode, offering
//! never blocks, and a pending frame that was not taken yet is replaced by the
//! newer one. In lossless mode, the producer waits for the consumer to take the
//! pending frame instead, until the buffer is interrupted.
//!
//! # Examples
//!
//! ```
//! use frame_triple_buffer::{Options, TripleBuffer};
//! use std::sync::mpsc;
//!
//! // The hook tells the consumer thread that a frame can be taken
//! let (notify_tx, notify_rx) = mpsc::channel();
//! let buf = TripleBuffer::new(Options::lossless(), &Vec::<u8>::new(), move || {
//!     let _ = notify_tx.send(());
//! });
//! let (mut producer, mut consumer) = buf.split();
//!
//! // The producer fills its frame in place, then offers it
//! let decoder = std::thread::spawn(move || {
//!     for i in 0..3u8 {
//!         let frame = producer.frame_mut();
//!         frame.clear();
//!         frame.extend_from_slice(&[i; 4]);
//!         producer.offer();
//!     }
//! });
//!
//! // The consumer takes a frame every time it is notified
//! for i in 0..3u8 {
//!     notify_rx.recv().unwrap();
//!     assert_eq!(consumer.take(), &[i; 4]);
//! }
//! decoder.join().unwrap();
//! ```

#![deny(missing_debug_implementations, missing_docs)]

mod error;
mod options;

pub use crate::{
    error::{BuildError, FactoryError},
    options::Options,
};

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::{
    cell::{Cell, UnsafeCell},
    fmt,
    marker::PhantomData,
    mem,
    sync::Arc,
};
use tracing::{debug, trace};

/// Hook invoked by the producer when a frame becomes available
type NotifyHook = Box<dyn FnMut() + Send>;

/// A frame triple buffer
///
/// This is a single-producer single-consumer channel of capacity one, where
/// the frames are never moved or copied: only the ownership of three
/// preallocated frames changes hands.
///
/// The producer and consumer fields of this struct are what the two threads
/// actually use in practice. They can be moved away from the TripleBuffer
/// struct with [`split()`](TripleBuffer::split), and are further documented
/// below.
///
#[derive(Debug)]
pub struct TripleBuffer<T: Send> {
    /// Producer object used to fill and offer frames
    producer: Producer<T>,

    /// Consumer object used to take offered frames
    consumer: Consumer<T>,
}
//
impl<T: Clone + Send> TripleBuffer<T> {
    /// Construct a triple buffer whose three frames are clones of `initial`
    ///
    /// `notify` is called on the producer thread every time a frame becomes
    /// available for taking, see [`Producer::offer()`].
    ///
    pub fn new(options: Options, initial: &T, notify: impl FnMut() + Send + 'static) -> Self {
        Self::from_frames(
            [initial.clone(), initial.clone(), initial.clone()],
            options,
            notify,
        )
    }
}
//
impl<T: Default + Send> TripleBuffer<T> {
    /// Construct a triple buffer with default-constructed frames
    pub fn default_with(options: Options, notify: impl FnMut() + Send + 'static) -> Self {
        Self::from_frames(Default::default(), options, notify)
    }
}
//
impl<T: Send> TripleBuffer<T> {
    /// Construct a triple buffer from three preallocated frames
    ///
    /// The first frame initially belongs to the producer, the last one to the
    /// consumer. All of them are dropped along with the buffer.
    ///
    pub fn from_frames(
        frames: [T; 3],
        options: Options,
        notify: impl FnMut() + Send + 'static,
    ) -> Self {
        // Start with the shared state...
        let shared_state = Arc::new(SharedState::new(frames, options));
        debug!(
            wait_consumer = options.wait_consumer,
            "built frame triple buffer"
        );

        // ...then construct the producer and consumer structs
        TripleBuffer {
            producer: Producer {
                shared: shared_state.clone(),
                producer_idx: 0,
                notify: Box::new(notify),
                stats: OfferStats::default(),
            },
            consumer: Consumer {
                shared: shared_state,
                consumer_idx: 2,
                _not_sync: PhantomData,
            },
        }
    }

    /// Construct a triple buffer, using a fallible factory to allocate frames
    ///
    /// The factory is called with the index of the frame to be built, in
    /// order. If it fails, the frames which were already built are dropped and
    /// the error is reported, so that no partially built buffer escapes.
    ///
    pub fn try_from_fn<E: Into<FactoryError>>(
        options: Options,
        mut factory: impl FnMut(usize) -> Result<T, E>,
        notify: impl FnMut() + Send + 'static,
    ) -> Result<Self, BuildError> {
        let mut build_frame = |index| {
            factory(index).map_err(|error| {
                let source: FactoryError = error.into();
                debug!(index, error = %source, "failed to allocate frame");
                BuildError::FrameAllocation { index, source }
            })
        };
        let frames = [build_frame(0)?, build_frame(1)?, build_frame(2)?];
        Ok(Self::from_frames(frames, options, notify))
    }

    /// Get a handle that can interrupt this buffer from any thread
    pub fn interrupter(&self) -> Interrupter<T> {
        self.producer.interrupter()
    }

    /// Options which this buffer was built with
    pub fn options(&self) -> Options {
        self.producer.options()
    }

    /// Extract producer and consumer of the triple buffer
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        (self.producer, self.consumer)
    }
}

/// Frame offering statistics, maintained by the producer
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct OfferStats {
    /// Number of frames that were offered
    pub offered: u64,

    /// Number of pending frames that were replaced before being taken
    pub skipped: u64,
}

/// Producer interface to the triple buffer
///
/// The producer owns one frame, which it can fill in place at leisure, then
/// offer to the consumer. In exchange, it receives the former pending frame,
/// whose contents are unspecified and should be reset before reuse.
///
pub struct Producer<T: Send> {
    /// Reference-counted shared state
    shared: Arc<SharedState<T>>,

    /// Index of the producer frame (which is private to the producer)
    producer_idx: BufferIndex,

    /// Frame availability notification hook
    notify: NotifyHook,

    /// Offering statistics
    stats: OfferStats,
}
//
// Public interface
impl<T: Send> Producer<T> {
    /// Access the producer frame
    ///
    /// This frame is not the one that was last offered, which may be in the
    /// hands of the consumer by now. It holds some older frame's contents.
    ///
    pub fn frame_mut(&mut self) -> &mut T {
        // The producer index is owned by this handle alone, and &mut self
        // rules out any other access to it
        let frame_ptr = self.shared.buffers[self.producer_idx as usize].get();
        unsafe { &mut *frame_ptr }
    }

    /// Make the producer frame available to the consumer
    ///
    /// The producer frame becomes the pending frame, and the producer gets the
    /// former pending frame in exchange. The returned flag tells whether the
    /// former pending frame was skipped, i.e. replaced before the consumer
    /// took it.
    ///
    /// In lossless mode, this waits for the consumer to take the pending frame
    /// if there is one, so nothing is skipped unless the buffer is interrupted.
    /// In lossy mode, this never blocks.
    ///
    /// If no frame was skipped, the notification hook is called on this
    /// thread, with no lock held. Otherwise, the notification of the skipped
    /// frame still stands for the new frame, since taking always fetches the
    /// latest pending frame, so the hook is not called again.
    ///
    pub fn offer(&mut self) -> bool {
        // Swap the producer frame and the pending frame under the lock,
        // waiting for the consumer first if so configured
        let skipped = {
            let shared_state = &*self.shared;
            let mut exchange = shared_state.exchange.lock();
            if let Some(consumed_cond) = &shared_state.pending_consumed_cond {
                while !exchange.pending_consumed && !exchange.interrupted {
                    consumed_cond.wait(&mut exchange);
                }
            }
            mem::swap(&mut self.producer_idx, &mut exchange.pending_idx);
            let skipped = !exchange.pending_consumed;
            exchange.pending_consumed = false;
            skipped
        };

        self.stats.offered += 1;
        if skipped {
            self.stats.skipped += 1;
        }
        trace!(skipped, "offered frame");

        // A skipped frame was already announced to the consumer
        if !skipped {
            (self.notify)();
        }
        skipped
    }

    /// Move a new frame into the producer slot and offer it
    ///
    /// See [`offer()`](Producer::offer) for the meaning of the result.
    ///
    pub fn write(&mut self, frame: T) -> bool {
        *self.frame_mut() = frame;
        self.offer()
    }

    /// Check if the consumer has taken our last offered frame yet
    ///
    /// This method is only intended for diagnostics purposes, as the answer
    /// may be outdated by the time it is received.
    ///
    pub fn consumed(&self) -> bool {
        self.shared.exchange.lock().pending_consumed
    }

    /// Statistics about the frames offered so far
    pub fn stats(&self) -> OfferStats {
        self.stats
    }

    /// Get a handle that can interrupt this buffer from any thread
    pub fn interrupter(&self) -> Interrupter<T> {
        Interrupter {
            shared: self.shared.clone(),
        }
    }

    /// Options which this buffer was built with
    pub fn options(&self) -> Options {
        self.shared.options
    }
}
//
impl<T: Send + fmt::Debug> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("shared", &self.shared)
            .field("producer_idx", &self.producer_idx)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Consumer interface to the triple buffer
///
/// The consumer owns one frame, which it can access without any
/// synchronization until it takes the next one.
///
/// Sharing a consumer between threads shares its frame, so this is only
/// allowed when frames can themselves be shared:
///
/// ```compile_fail
/// use frame_triple_buffer::{Options, TripleBuffer};
/// use std::cell::Cell;
///
/// fn assert_sync<S: Sync>(_: &S) {}
///
/// let buf = TripleBuffer::new(Options::lossy(), &Cell::new(0u8), || {});
/// let (_producer, consumer) = buf.split();
/// assert_sync(&consumer);
/// ```
///
#[derive(Debug)]
pub struct Consumer<T: Send> {
    /// Reference-counted shared state
    shared: Arc<SharedState<T>>,

    /// Index of the consumer frame (which is private to the consumer)
    consumer_idx: BufferIndex,

    /// Opt out of the Sync impl inherited from the shared state
    _not_sync: PhantomData<Cell<()>>,
}
//
unsafe impl<T: Send + Sync> Sync for Consumer<T> {}
//
// Public interface
impl<T: Send> Consumer<T> {
    /// Take the pending frame
    ///
    /// The pending frame becomes the consumer frame, and stays valid until the
    /// next take. If the producer was waiting for this frame to be taken, it
    /// is woken up.
    ///
    /// This should only be called when a frame is known to be pending, which
    /// is normally the case after each notification from the producer.
    ///
    /// # Panics
    ///
    /// If no frame is pending, which is a usage error. Use
    /// [`try_take()`](Consumer::try_take) if that is expected.
    ///
    pub fn take(&mut self) -> &T {
        match self.try_take() {
            Some(frame) => frame,
            None => panic!("took a frame from a triple buffer with no pending frame"),
        }
    }

    /// Take the pending frame if there is one
    ///
    /// This behaves like [`take()`](Consumer::take), but returns None instead
    /// of panicking when no frame is pending, leaving the consumer frame as is.
    ///
    pub fn try_take(&mut self) -> Option<&T> {
        // Swap the pending frame and the consumer frame under the lock
        {
            let shared_state = &*self.shared;
            let mut exchange = shared_state.exchange.lock();
            if exchange.pending_consumed {
                return None;
            }
            exchange.pending_consumed = true;
            mem::swap(&mut self.consumer_idx, &mut exchange.pending_idx);

            // Unblock a producer waiting in offer()
            if let Some(consumed_cond) = &shared_state.pending_consumed_cond {
                consumed_cond.notify_one();
            }
        }
        trace!("took frame");

        Some(self.frame())
    }

    /// Access the consumer frame, without taking a new one
    pub fn frame(&self) -> &T {
        // No other handle accesses the consumer frame until the next take
        // hands it back, and concurrent access through &self is only possible
        // if T is Sync
        let frame_ptr = self.shared.buffers[self.consumer_idx as usize].get();
        unsafe { &*frame_ptr }
    }

    /// Modify the consumer frame in place
    ///
    /// Keep in mind that this frame will eventually be handed back to the
    /// producer after the next take, so it must stay a valid frame.
    ///
    pub fn frame_mut(&mut self) -> &mut T {
        // The consumer index is owned by this handle alone, and &mut self
        // rules out any other access to it
        let frame_ptr = self.shared.buffers[self.consumer_idx as usize].get();
        unsafe { &mut *frame_ptr }
    }

    /// Tell whether a frame is pending
    ///
    /// This method is only intended for diagnostics purposes. Waiting for a
    /// frame should be done through the notification hook.
    ///
    pub fn pending(&self) -> bool {
        !self.shared.exchange.lock().pending_consumed
    }

    /// Get a handle that can interrupt this buffer from any thread
    pub fn interrupter(&self) -> Interrupter<T> {
        Interrupter {
            shared: self.shared.clone(),
        }
    }

    /// Options which this buffer was built with
    pub fn options(&self) -> Options {
        self.shared.options
    }
}

/// Cooperative cancellation handle
///
/// In lossless mode, interrupting the buffer releases a producer waiting in
/// [`Producer::offer()`] without a matching take, which is needed to shut it
/// down cleanly. From then on, offering never blocks again, so pending frames
/// may be skipped. This cannot be undone.
///
/// In lossy mode, nothing ever blocks, so interrupting has no effect.
///
#[derive(Debug)]
pub struct Interrupter<T: Send> {
    /// Reference-counted shared state
    shared: Arc<SharedState<T>>,
}
//
impl<T: Send> Interrupter<T> {
    /// Interrupt the buffer, waking up a blocked producer
    ///
    /// Calling this several times is harmless.
    ///
    pub fn interrupt(&self) {
        let shared_state = &*self.shared;
        if let Some(consumed_cond) = &shared_state.pending_consumed_cond {
            shared_state.exchange.lock().interrupted = true;
            debug!("interrupted frame triple buffer");
            consumed_cond.notify_one();
        }
    }

    /// Tell whether the buffer was interrupted
    pub fn is_interrupted(&self) -> bool {
        self.shared.exchange.lock().interrupted
    }
}
//
impl<T: Send> Clone for Interrupter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Triple buffer shared state
///
/// In this communication protocol, the producer and consumer share:
///
/// - Three frames, whose roles are tracked through indices
/// - The exchange state, which may only be accessed under the lock
/// - In lossless mode, a condition variable signaled whenever the pending
///   frame is taken or the buffer is interrupted
///
#[derive(Debug)]
struct SharedState<T: Send> {
    /// Frame storage
    buffers: [CachePadded<UnsafeCell<T>>; 3],

    /// Pending frame and bookkeeping flags
    exchange: CachePadded<Mutex<ExchangeState>>,

    /// Signaled when the pending frame is consumed (lossless mode only)
    pending_consumed_cond: Option<Condvar>,

    /// Construction options
    options: Options,
}
//
impl<T: Send> SharedState<T> {
    /// Build the shared state, with frame 1 initially pending
    fn new(frames: [T; 3], options: Options) -> Self {
        Self {
            buffers: frames.map(|frame| CachePadded::new(UnsafeCell::new(frame))),
            exchange: CachePadded::new(Mutex::new(ExchangeState {
                pending_idx: 1,
                // There is no pending frame yet, so it counts as consumed
                pending_consumed: true,
                interrupted: false,
            })),
            pending_consumed_cond: options.wait_consumer.then(Condvar::new),
            options,
        }
    }
}
//
impl<T: Send> Drop for SharedState<T> {
    fn drop(&mut self) {
        trace!("releasing frame triple buffer");
    }
}
//
unsafe impl<T: Send> Sync for SharedState<T> {}

/// Lock-protected part of the shared state
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct ExchangeState {
    /// Index of the pending frame
    pending_idx: BufferIndex,

    /// Truth that the pending frame holds nothing that awaits a take
    pending_consumed: bool,

    /// Truth that the buffer was interrupted (never reset)
    interrupted: bool,
}

/// Index type used to designate one of the three frames
type BufferIndex = u8;
