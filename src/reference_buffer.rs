/// Far-end reference buffer module
///
/// Ring buffer holding the most recent far-end (loudspeaker) samples in the
/// normalized domain. The playback task pushes, the capture task reads the
/// most recent window without consuming it. When full, the oldest samples
/// are evicted so the tail always holds the newest audio.

use crate::sample::Sample;
use cache_padded::CachePadded;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use thiserror::Error;
use tracing::{debug, trace};

/// Maximum reference capacity in samples
pub const MAX_CAPACITY: usize = 4096;

/// Default reference capacity in samples
pub const DEFAULT_CAPACITY: usize = MAX_CAPACITY;

#[derive(Error, Debug)]
pub enum ReferenceBufferError {
    #[error("Insufficient reference data: requested {requested} samples, but only {available} available")]
    InsufficientData { requested: usize, available: usize },

    #[error("Invalid capacity: {0} (must be between 1 and 4096)")]
    InvalidCapacity(usize),
}

type RingBuffer = HeapRb<Sample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Ring buffer for normalized far-end samples
/// Uses separate producer and consumer halves for concurrent access
pub struct ReferenceBuffer {
    producer: CachePadded<Mutex<RingProducer>>,
    consumer: CachePadded<Mutex<RingConsumer>>,
    capacity: usize,
}

impl ReferenceBuffer {
    /// Create a buffer with the default capacity
    pub fn new() -> Self {
        // Default capacity is always in range
        Self::with_capacity(DEFAULT_CAPACITY).expect("default capacity is valid")
    }

    /// Create a buffer with custom capacity (1..=4096 samples)
    pub fn with_capacity(capacity: usize) -> Result<Self, ReferenceBufferError> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(ReferenceBufferError::InvalidCapacity(capacity));
        }

        debug!("Creating reference buffer with capacity: {} samples", capacity);

        let rb = HeapRb::<Sample>::new(capacity);
        let (producer, consumer) = rb.split();

        Ok(Self {
            producer: CachePadded::new(Mutex::new(producer)),
            consumer: CachePadded::new(Mutex::new(consumer)),
            capacity,
        })
    }

    /// Append normalized samples, evicting the oldest when full
    ///
    /// A push larger than the whole capacity keeps only the newest
    /// `capacity` samples of that push.
    pub fn push(&self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }

        let mut producer = self.producer.lock();

        // Oversized push: the surviving samples are the tail of the input
        let to_push = if samples.len() > self.capacity {
            &samples[samples.len() - self.capacity..]
        } else {
            samples
        };

        let available_space = producer.vacant_len();
        if to_push.len() > available_space {
            let to_drop = to_push.len() - available_space;
            let mut consumer = self.consumer.lock();
            consumer.skip(to_drop);
            drop(consumer);

            trace!("Reference buffer full, evicted {} oldest samples", to_drop);
        }

        let written = producer.push_slice(to_push);
        trace!("Pushed {} reference samples", written);
    }

    /// Read the most recent `n` samples in oldest-to-newest order
    /// without consuming them
    pub fn recent(&self, n: usize) -> Result<Vec<Sample>, ReferenceBufferError> {
        let consumer = self.consumer.lock();
        let available = consumer.occupied_len();

        if n > available {
            return Err(ReferenceBufferError::InsufficientData {
                requested: n,
                available,
            });
        }

        // A concurrent push can extend the occupied region between the
        // occupied_len read and iter; take(n) pins the window to the length
        // observed above
        let mut result = Vec::with_capacity(n);
        for item in consumer.iter().skip(available - n).take(n) {
            result.push(*item);
        }

        Ok(result)
    }

    /// Number of samples currently stored
    pub fn len(&self) -> usize {
        let consumer = self.consumer.lock();
        consumer.occupied_len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer capacity in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fraction of the capacity currently occupied (0.0 - 1.0)
    pub fn fill_ratio(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }

    /// Discard all stored samples
    pub fn clear(&self) {
        let mut consumer = self.consumer.lock();
        let occupied = consumer.occupied_len();
        consumer.skip(occupied);
        debug!("Cleared reference buffer ({} samples dropped)", occupied);
    }
}

impl Default for ReferenceBuffer {
    fn default() -> Self {
        Self::new()
    }
}
