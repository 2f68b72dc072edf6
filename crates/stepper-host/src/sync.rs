//! Small synchronization helpers.

use parking_lot::{Condvar, Mutex};

/// A resettable completion flag, equivalent to a manual-reset event.
///
/// The control thread sets it when a command finishes; blocking callers
/// clear it before enqueueing and then wait.
pub struct Event {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self { flag: Mutex::new(false), cond: Condvar::new() }
    }

    pub fn set(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.flag.lock() = false;
    }

    /// Blocks until the event is set.
    pub fn wait(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.cond.wait(&mut flag);
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wait_returns_after_set() {
        let event = Arc::new(Event::new());
        let waiter = event.clone();
        let handle = std::thread::spawn(move || waiter.wait());

        std::thread::sleep(Duration::from_millis(20));
        event.set();
        handle.join().unwrap();
    }

    #[test]
    fn set_before_wait_does_not_block() {
        let event = Event::new();
        event.set();
        event.wait();
        event.clear();
        event.set();
        event.wait();
    }
}
