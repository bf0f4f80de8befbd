/*!
Queue infrastructure for `rollfile`'s background writers.

A [`Sender`] accumulates items into a batch under a short-lived lock. A single [`Receiver`] swaps that batch out and processes it on a dedicated thread, so producers never wait on the work done with their items.

The queue is unbounded; it only grows while the receiver is behind. Once the queue is closed, either explicitly through [`Sender::close`] or by dropping one of its halves, new items are discarded but everything already queued is still handed to the receiver before it returns.
*/

#![deny(missing_docs)]

use crate::internal_metrics::InternalMetrics;
use std::{
    cmp, mem,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

mod internal_metrics;

pub mod sync;

/**
A container for items pushed through the queue.
*/
pub trait Channel {
    /**
    The type of items in the channel.
    */
    type Item;

    /**
    Create a new, empty channel.
    */
    fn new() -> Self;

    /**
    Create a new, empty channel that can hold at least `capacity` items without reallocating.
    */
    fn with_capacity(capacity: usize) -> Self
    where
        Self: Sized,
    {
        let _ = capacity;

        Self::new()
    }

    /**
    Push an item onto the end of the channel.
    */
    fn push(&mut self, item: Self::Item);

    /**
    The number of items in the channel.
    */
    fn remaining(&self) -> usize;

    /**
    Whether there are no items in the channel.
    */
    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

impl<T> Channel for Vec<T> {
    type Item = T;

    fn new() -> Self {
        Vec::new()
    }

    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }

    fn push(&mut self, item: Self::Item) {
        self.push(item);
    }

    fn remaining(&self) -> usize {
        self.len()
    }

    fn is_empty(&self) -> bool {
        self.is_empty()
    }
}

/**
Create an unbounded queue.

The [`Sender`] is used by producers to push items. The [`Receiver`] should be moved onto a dedicated thread and driven by [`Receiver::blocking_exec`].
*/
pub fn unbounded<T: Channel>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        metrics: Default::default(),
        state: Mutex::new(State {
            next_batch: Batch::new(),
            is_open: true,
            is_in_batch: false,
        }),
        wake: Condvar::new(),
    });

    (
        Sender {
            shared: shared.clone(),
        },
        Receiver {
            idle_delay: Delay::new(Duration::from_millis(1), Duration::from_millis(500)),
            capacity: Capacity::new(),
            shared,
        },
    )
}

/**
The producer half of a queue.

A [`Sender`] can be shared between threads by reference.
*/
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl<T: Channel> Sender<T> {
    /**
    Push an item onto the queue.

    This method returns `false` without queueing the item if the queue has been closed.
    */
    pub fn send(&self, msg: T::Item) -> bool {
        let mut state = self.shared.state.lock().unwrap();

        // If the channel is closed then return without adding the message
        if !state.is_open {
            drop(state);

            self.shared.metrics.queue_closed_dropped.increment();
            return false;
        }

        let was_empty = state.next_batch.channel.is_empty();
        state.next_batch.channel.push(msg);

        drop(state);

        // Only the first item in a batch needs to wake the receiver
        if was_empty {
            self.shared.wake.notify_one();
        }

        true
    }

    /**
    Close the queue.

    Items already in the queue are still handed to the receiver. Items sent after this call are discarded.
    */
    pub fn close(&self) {
        self.shared.close();
    }

    /**
    Schedule `watcher` to be called once all items currently in the queue have been processed.

    If there's nothing to process then `watcher` is called immediately on the current thread.
    */
    pub fn on_next_flush(&self, watcher: impl FnOnce() + Send + 'static) {
        let watcher = Box::new(watcher);

        let mut state = self.shared.state.lock().unwrap();

        // If:
        // - We're not in a batch and
        //   - the next batch is empty (there's no data) or
        //   - the state is closed
        // Then:
        // - Call the watcher without scheduling it; there's nothing to wait for
        if !state.is_in_batch && (state.next_batch.channel.is_empty() || !state.is_open) {
            // Drop the lock before signalling the watcher
            drop(state);

            watcher();
        }
        // If there's active data to flush then schedule the watcher
        else {
            state.next_batch.watchers.push(watcher);

            drop(state);

            self.shared.wake.notify_one();
        }
    }

    /**
    Sample the current values of the queue's internal counters.
    */
    pub fn sample_metrics(&self) -> impl Iterator<Item = (&'static str, usize)> + 'static {
        self.shared.sample_metrics()
    }
}

/**
The consumer half of a queue.
*/
pub struct Receiver<T> {
    idle_delay: Delay,
    capacity: Capacity,
    shared: Arc<Shared<T>>,
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl<T: Channel> Receiver<T> {
    /**
    Process batches on the current thread until the queue is closed and fully drained.

    Batches are handed to `on_batch` in the order their items were sent. If `on_batch` panics the batch is discarded and processing continues with the next one.
    */
    pub fn blocking_exec(mut self, mut on_batch: impl FnMut(T)) {
        // This variable holds the "next" batch
        // Under the lock all we do is push onto a pre-allocated vec
        // and replace it with another pre-allocated vec
        let mut next_batch = Batch::new();

        loop {
            // Run inside the lock
            let (current_batch, is_open) = {
                let mut state = self.shared.state.lock().unwrap();

                // NOTE: We don't check the `is_open` value here because we want a chance to process
                // any last batch

                // If there are items then mark that we're in a batch and replace it with an empty one
                // The sender will start filling this new batch
                if state.next_batch.channel.remaining() > 0 {
                    state.is_in_batch = true;

                    (
                        mem::replace(&mut state.next_batch, mem::take(&mut next_batch)),
                        state.is_open,
                    )
                }
                // If there are no items then mark that we're outside of a batch and take its watchers
                else {
                    state.is_in_batch = false;

                    let watchers = mem::take(&mut state.next_batch.watchers);
                    let open = state.is_open;

                    (
                        Batch {
                            channel: T::new(),
                            watchers,
                        },
                        open,
                    )
                }
            };

            // Run outside of the lock
            if current_batch.channel.remaining() > 0 {
                self.idle_delay.reset();

                // Re-allocate our next buffer outside of the lock
                next_batch = Batch {
                    channel: T::with_capacity(
                        self.capacity.next(current_batch.channel.remaining()),
                    ),
                    watchers: Watchers::new(),
                };

                let Batch { channel, watchers } = current_batch;

                // Process the batch, taking care not to panic
                match panic::catch_unwind(AssertUnwindSafe(|| on_batch(channel))) {
                    Ok(()) => self.shared.metrics.queue_batch_processed.increment(),
                    Err(_) => self.shared.metrics.queue_batch_panicked.increment(),
                }

                // After the batch has been processed, notify any watchers
                watchers.notify();
            }
            // If the batch was empty then notify any watchers (there was nothing to flush)
            // and wait before checking again
            else {
                current_batch.watchers.notify();

                // If the channel is closed then exit the loop and return; this will
                // drop the receiver
                if !is_open {
                    return;
                }

                let delay = self.idle_delay.next();

                let state = self.shared.state.lock().unwrap();

                // Only park if nothing arrived while the lock was released
                if state.is_open
                    && state.next_batch.channel.is_empty()
                    && state.next_batch.watchers.is_empty()
                {
                    let _ = self.shared.wake.wait_timeout(state, delay).unwrap();
                }
            }
        }
    }
}

struct Delay {
    current: Duration,
    step: Duration,
    max: Duration,
}

impl Delay {
    fn new(step: Duration, max: Duration) -> Delay {
        Delay {
            current: Duration::ZERO,
            step,
            max,
        }
    }

    fn reset(&mut self) {
        self.current = Duration::ZERO
    }

    fn next(&mut self) -> Duration {
        self.current = cmp::min(self.current * 2 + self.step, self.max);
        self.current
    }
}

const CAPACITY_WINDOW: usize = 16;

struct Capacity([usize; CAPACITY_WINDOW], usize);

impl Capacity {
    fn new() -> Self {
        Capacity([1; CAPACITY_WINDOW], 0)
    }

    fn next(&mut self, last_len: usize) -> usize {
        self.0[self.1 % CAPACITY_WINDOW] = last_len;
        self.1 = self.1.wrapping_add(1);

        self.0.iter().copied().max().unwrap_or(1)
    }
}

struct Shared<T> {
    metrics: InternalMetrics,
    state: Mutex<State<T>>,
    wake: Condvar,
}

impl<T> Shared<T> {
    fn close(&self) {
        self.state.lock().unwrap().is_open = false;
        self.wake.notify_all();
    }
}

impl<T: Channel> Shared<T> {
    fn sample_metrics(&self) -> impl Iterator<Item = (&'static str, usize)> + 'static {
        let queue_length = { self.state.lock().unwrap().next_batch.channel.remaining() };

        self.metrics
            .sample()
            .chain(Some(("queue_length", queue_length)))
    }
}

struct State<T> {
    next_batch: Batch<T>,
    is_open: bool,
    is_in_batch: bool,
}

struct Batch<T> {
    channel: T,
    watchers: Watchers,
}

impl<T: Channel> Batch<T> {
    fn new() -> Self {
        Batch {
            channel: T::new(),
            watchers: Watchers::new(),
        }
    }
}

impl<T: Channel> Default for Batch<T> {
    fn default() -> Self {
        Batch::new()
    }
}

struct Watchers(Vec<Watcher>);

type Watcher = Box<dyn FnOnce() + Send>;

impl Default for Watchers {
    fn default() -> Self {
        Watchers::new()
    }
}

impl Watchers {
    fn new() -> Self {
        Watchers(Vec::new())
    }

    fn push(&mut self, watcher: Watcher) {
        self.0.push(watcher);
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn notify(self) {
        for watcher in self.0 {
            let _ = panic::catch_unwind(AssertUnwindSafe(watcher));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;

    #[test]
    fn drains_after_close() {
        let (sender, receiver) = unbounded::<Vec<usize>>();

        for i in 0..100 {
            assert!(sender.send(i));
        }

        sender.close();
        assert!(!sender.send(100));

        let mut received = Vec::new();
        receiver.blocking_exec(|batch| received.extend(batch));

        assert_eq!((0..100).collect::<Vec<_>>(), received);
    }

    #[test]
    fn preserves_order_across_batches() {
        let (sender, receiver) = unbounded::<Vec<usize>>();

        let handle = thread::spawn(move || {
            let mut received = Vec::new();
            receiver.blocking_exec(|batch| received.extend(batch));
            received
        });

        for i in 0..10_000 {
            sender.send(i);
        }

        drop(sender);

        let received = handle.join().unwrap();

        assert_eq!((0..10_000).collect::<Vec<_>>(), received);
    }

    #[test]
    fn survives_panicking_batch() {
        let (sender, receiver) = unbounded::<Vec<usize>>();

        sender.send(1);

        let handle = thread::spawn(move || {
            let mut received = Vec::new();
            receiver.blocking_exec(|batch| {
                if batch.contains(&1) {
                    panic!("explicit panic");
                }

                received.extend(batch)
            });
            received
        });

        sync::blocking_flush(&sender, Duration::from_secs(5));

        sender.send(2);
        sender.close();

        let received = handle.join().unwrap();

        assert_eq!(vec![2], received);

        let panicked = sender
            .sample_metrics()
            .find(|(name, _)| *name == "queue_batch_panicked")
            .map(|(_, value)| value);

        assert_eq!(Some(1), panicked);
    }
}
