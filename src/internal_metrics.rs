use std::sync::atomic::{AtomicUsize, Ordering};

macro_rules! metrics {
    ($container:ident {
        $(
            $name:ident: $ty:ty,
        )*
    }) => {
        #[derive(Default)]
        pub(crate) struct $container {
            $(
                pub(crate) $name: $ty
            ),*
        }

        impl $container {
            pub fn sample(&self) -> impl Iterator<Item = (&'static str, usize)> + 'static {
                let $container {
                    $(
                        $name
                    ),*
                } = self;

                [
                    $(
                        (stringify!($name), $name.sample())
                    ),*
                ]
                .into_iter()
            }
        }
    };
}

metrics!(InternalMetrics {
    file_create: Counter,
    file_create_failed: Counter,
    file_reopen: Counter,
    file_rotate: Counter,
    file_rename: Counter,
    file_write_failed: Counter,
    file_compress: Counter,
    file_compress_failed: Counter,
    file_delete: Counter,
    file_retention_failed: Counter,
    file_close: Counter,
    writer_dropped: Counter,
    writer_write_failed: Counter,
    writer_forward_failed: Counter,
});

#[derive(Default)]
pub(crate) struct Counter(AtomicUsize);

impl Counter {
    pub fn increment(&self) {
        self.increment_by(1);
    }

    pub fn increment_by(&self, by: usize) {
        self.0.fetch_add(by, Ordering::Relaxed);
    }

    pub fn sample(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}
