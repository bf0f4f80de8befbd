/*!
Blocking helpers for waiting on a queue.
*/

use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use crate::{Channel, Sender};

#[derive(Clone)]
struct Trigger(Arc<(Mutex<bool>, Condvar)>);

impl Trigger {
    fn new() -> Self {
        Trigger(Arc::new((Mutex::new(false), Condvar::new())))
    }

    fn trigger(self) {
        *(self.0).0.lock().unwrap() = true;
        (self.0).1.notify_all();
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        let mut flushed = (self.0).0.lock().unwrap();
        while !*flushed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            flushed = (self.0).1.wait_timeout(flushed, deadline - now).unwrap().0;
        }

        true
    }
}

/**
Wait until all items sent before this call have been processed by the receiver.

This method returns `false` if `timeout` elapses first.
*/
pub fn blocking_flush<T: Channel>(sender: &Sender<T>, timeout: Duration) -> bool {
    let on_flush = Trigger::new();

    sender.on_next_flush({
        let on_flush = on_flush.clone();

        move || {
            on_flush.trigger();
        }
    });

    on_flush.wait_timeout(timeout)
}
