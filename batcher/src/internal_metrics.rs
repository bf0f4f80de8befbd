use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub(crate) struct InternalMetrics {
    pub(crate) queue_closed_dropped: Counter,
    pub(crate) queue_batch_processed: Counter,
    pub(crate) queue_batch_panicked: Counter,
}

#[derive(Default)]
pub(crate) struct Counter(AtomicUsize);

impl Counter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sample(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

impl InternalMetrics {
    pub fn sample(&self) -> impl Iterator<Item = (&'static str, usize)> + 'static {
        let InternalMetrics {
            queue_closed_dropped,
            queue_batch_processed,
            queue_batch_panicked,
        } = self;

        [
            ("queue_closed_dropped", queue_closed_dropped.sample()),
            ("queue_batch_processed", queue_batch_processed.sample()),
            ("queue_batch_panicked", queue_batch_panicked.sample()),
        ]
        .into_iter()
    }
}
