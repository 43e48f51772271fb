/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A one-shot, resettable wake-up signal that threads can block on.

use std::{
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

/// Threads [`wait`](Trigger::wait) on a trigger until some other thread [`wake`](Trigger::wake)s it.
/// Once woken, a trigger stays woken (and waits return immediately) until it is
/// [`reset`](Trigger::reset).
#[derive(Default)]
pub struct Trigger {
    woken: Mutex<bool>,
    condvar: Condvar,
}

impl Trigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        *self.woken.lock().unwrap() = true;
        self.condvar.notify_all();
    }

    pub fn reset(&self) {
        *self.woken.lock().unwrap() = false;
    }

    pub fn is_woken(&self) -> bool {
        *self.woken.lock().unwrap()
    }

    /// Block until the trigger is woken.
    pub fn wait(&self) {
        let mut woken = self.woken.lock().unwrap();
        while !*woken {
            woken = self.condvar.wait(woken).unwrap();
        }
    }

    /// Block until the trigger is woken, or until `timeout` elapses. Returns whether the trigger was
    /// woken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut woken = self.woken.lock().unwrap();
        while !*woken {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            woken = self.condvar.wait_timeout(woken, deadline - now).unwrap().0;
        }
        true
    }
}
