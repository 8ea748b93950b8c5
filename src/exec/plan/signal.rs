// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Completion and wakeup primitives for plan lifecycle coordination.
//!
//! Responsibilities:
//! - [`FinishSignal`]: one-shot settleable status cell with first-writer-wins
//!   semantics, blocking waits, and settlement observers.
//! - [`Observable`]: one-shot callback registry used for pause/resume and
//!   other scheduling wakeups.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::basalt_logging::debug;
use crate::common::error::Result;

/// Callback invoked once when the observed event fires.
pub type Observer = Box<dyn FnOnce() + Send>;

/// One-shot observer registry. Observers registered after a notification
/// has fired are held until the next notification, so callers re-check their
/// condition after registering.
#[derive(Default)]
pub struct Observable {
    observers: Mutex<Vec<Observer>>,
}

impl Observable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_observer(&self, observer: Observer) {
        let mut guard = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        guard.push(observer);
    }

    /// Drain and invoke all registered observers outside the lock.
    pub fn notify(&self) {
        let observers = {
            let mut guard = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for observer in observers {
            observer();
        }
    }

    pub fn num_observers(&self) -> usize {
        let guard = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        guard.len()
    }
}

struct SignalState {
    status: Option<Result<()>>,
}

/// One-shot completion cell. The first writer settles the final status;
/// later writers observe the cell is settled and drop their value.
pub struct FinishSignal {
    mu: Mutex<SignalState>,
    cv: Condvar,
    observers: Mutex<Vec<Observer>>,
}

impl FinishSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mu: Mutex::new(SignalState { status: None }),
            cv: Condvar::new(),
            observers: Mutex::new(Vec::new()),
        })
    }

    pub fn finished(status: Result<()>) -> Arc<Self> {
        let signal = Self::new();
        signal.settle(status);
        signal
    }

    /// Settle the signal. Returns whether this call was the first writer.
    pub fn settle(&self, status: Result<()>) -> bool {
        {
            let mut state = self.mu.lock().unwrap_or_else(|e| e.into_inner());
            if state.status.is_some() {
                debug!("finish signal already settled; dropping later status");
                return false;
            }
            state.status = Some(status);
            self.cv.notify_all();
        }
        let observers = {
            let mut guard = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for observer in observers {
            observer();
        }
        true
    }

    pub fn is_settled(&self) -> bool {
        let state = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        state.status.is_some()
    }

    /// Current status if settled.
    pub fn peek(&self) -> Option<Result<()>> {
        let state = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        state.status.clone()
    }

    /// Block until the signal settles and return the final status.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(status) = state.status.clone() {
                return status;
            }
            state = self.cv.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Wait up to `timeout`; `None` means the signal did not settle in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<()>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(status) = state.status.clone() {
                return Some(status);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .cv
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    /// Register a callback to run at settlement. Fires immediately if the
    /// signal is already settled.
    pub fn add_observer(&self, observer: Observer) {
        {
            let state = self.mu.lock().unwrap_or_else(|e| e.into_inner());
            if state.status.is_none() {
                let mut guard = self.observers.lock().unwrap_or_else(|e| e.into_inner());
                guard.push(observer);
                return;
            }
        }
        observer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::EngineError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn first_writer_wins() {
        let signal = FinishSignal::new();
        assert!(signal.settle(Err(EngineError::Execution("first".to_string()))));
        assert!(!signal.settle(Ok(())));
        assert_eq!(
            signal.wait(),
            Err(EngineError::Execution("first".to_string()))
        );
    }

    #[test]
    fn observer_fires_once_even_if_registered_late() {
        let signal = FinishSignal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let early = Arc::clone(&count);
        signal.add_observer(Box::new(move || {
            early.fetch_add(1, Ordering::SeqCst);
        }));
        signal.settle(Ok(()));
        let late = Arc::clone(&count);
        signal.add_observer(Box::new(move || {
            late.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wait_timeout_reports_unsettled_signal() {
        let signal = FinishSignal::new();
        assert!(signal.wait_timeout(Duration::from_millis(20)).is_none());
        signal.settle(Ok(()));
        assert_eq!(signal.wait_timeout(Duration::from_millis(20)), Some(Ok(())));
    }

    #[test]
    fn observable_drains_on_notify() {
        let observable = Observable::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            observable.add_observer(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        observable.notify();
        observable.notify();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(observable.num_observers(), 0);
    }
}
