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
//! Batch channels at the edges of a plan.
//!
//! Responsibilities:
//! - Defines the lazy [`BatchGenerator`] sequence sources drain
//!   (`Ok(None)` terminates, errors travel in-band).
//! - Provides the bounded [`BatchQueue`] that pull-style sinks expose to
//!   callers, with close/error terminal states.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::common::error::{EngineError, Result};
use crate::exec::batch::Batch;

/// Lazy sequence of batches consumed by a source node. `Ok(None)` means the
/// sequence is exhausted; an error terminates the plan's producing subtree.
pub trait BatchGenerator: Send {
    fn next_batch(&mut self) -> Result<Option<Batch>>;
}

pub type BoxedBatchGenerator = Box<dyn BatchGenerator>;

/// Generator over a fixed batch set, optionally sleeping before each batch
/// to emulate a slow producer in tests.
pub struct VecBatchGenerator {
    batches: VecDeque<Batch>,
    delay: Option<Duration>,
}

impl VecBatchGenerator {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self {
            batches: batches.into(),
            delay: None,
        }
    }

    pub fn slow(batches: Vec<Batch>, delay: Duration) -> Self {
        Self {
            batches: batches.into(),
            delay: Some(delay),
        }
    }
}

impl BatchGenerator for VecBatchGenerator {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(self.batches.pop_front())
    }
}

/// Generator driven by a closure, for adapters and failure injection.
pub struct FnBatchGenerator<F>(pub F);

impl<F> BatchGenerator for FnBatchGenerator<F>
where
    F: FnMut() -> Result<Option<Batch>> + Send,
{
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        (self.0)()
    }
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Batch>,
    closed: bool,
    error: Option<EngineError>,
}

/// Bounded in-memory batch queue with terminal close/error states.
///
/// Producers push without blocking; the consumer blocks in [`recv`] until a
/// batch, close, or error arrives. Watermark decisions are left to the sink
/// that owns the queue.
///
/// [`recv`]: BatchQueue::recv
pub struct BatchQueue {
    mu: Mutex<QueueState>,
    cv: Condvar,
}

impl BatchQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mu: Mutex::new(QueueState::default()),
            cv: Condvar::new(),
        })
    }

    /// Enqueue a batch. Returns the queue length after the push, or `None`
    /// if the queue already reached a terminal state and dropped the batch.
    pub fn push(&self, batch: Batch) -> Option<usize> {
        let mut state = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed || state.error.is_some() {
            return None;
        }
        state.queue.push_back(batch);
        let len = state.queue.len();
        self.cv.notify_all();
        Some(len)
    }

    /// Close the queue; pending batches stay consumable.
    pub fn close(&self) {
        let mut state = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        self.cv.notify_all();
    }

    /// Close the queue with an error, discarding buffered batches.
    pub fn fail(&self, error: EngineError) {
        let mut state = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        if state.error.is_none() {
            state.error = Some(error);
        }
        state.queue.clear();
        state.closed = true;
        self.cv.notify_all();
    }

    /// Blocking pull. Returns `Ok(Some(batch))`, `Ok(None)` at end of
    /// stream, or the terminal error. The second tuple element is the queue
    /// length after the pop, for watermark decisions.
    pub fn recv(&self) -> (Result<Option<Batch>>, usize) {
        let mut state = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(err) = state.error.as_ref() {
                return (Err(err.clone()), 0);
            }
            if let Some(batch) = state.queue.pop_front() {
                let remaining = state.queue.len();
                return (Ok(Some(batch)), remaining);
            }
            if state.closed {
                return (Ok(None), 0);
            }
            state = self.cv.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn len(&self) -> usize {
        let state = self.mu.lock().unwrap_or_else(|e| e.into_inner());
        state.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::batch::Column;
    use arrow::array::Int32Array;

    fn batch(values: Vec<i32>) -> Batch {
        let len = values.len();
        Batch::try_new(
            vec![Column::Array(Arc::new(Int32Array::from(values)))],
            len,
        )
        .expect("batch")
    }

    #[test]
    fn queue_drains_pending_batches_after_close() {
        let queue = BatchQueue::new();
        queue.push(batch(vec![1]));
        queue.push(batch(vec![2]));
        queue.close();
        assert!(queue.push(batch(vec![3])).is_none());
        assert!(matches!(queue.recv(), (Ok(Some(_)), 1)));
        assert!(matches!(queue.recv(), (Ok(Some(_)), 0)));
        assert!(matches!(queue.recv(), (Ok(None), 0)));
    }

    #[test]
    fn queue_error_discards_buffered_batches() {
        let queue = BatchQueue::new();
        queue.push(batch(vec![1]));
        queue.fail(EngineError::Execution("boom".to_string()));
        let (result, _) = queue.recv();
        assert!(matches!(result, Err(EngineError::Execution(_))));
    }

    #[test]
    fn vec_generator_terminates_with_none() {
        let mut generator = VecBatchGenerator::new(vec![batch(vec![1]), batch(vec![2])]);
        assert!(generator.next_batch().expect("batch").is_some());
        assert!(generator.next_batch().expect("batch").is_some());
        assert!(generator.next_batch().expect("end").is_none());
    }
}
