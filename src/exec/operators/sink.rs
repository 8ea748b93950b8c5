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
//! Pull-style sink node.
//!
//! Responsibilities:
//! - Buffers incoming batches in a bounded queue exposed to the caller
//!   through a cloneable [`SinkHandle`].
//! - Issues pause/resume to its input around the buffer's high and low
//!   watermarks with per-edge monotonic counters.
//!
//! Key exported interfaces:
//! - Types: `SinkHandle`, `SinkNodeOptions`, `SinkNode`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use arrow::datatypes::Schema;

use crate::basalt_logging::debug;
use crate::common::config;
use crate::common::error::{EngineError, Result};
use crate::exec::batch::Batch;
use crate::exec::channel::BatchQueue;
use crate::exec::plan::declare::{typed_options, NodeOptions};
use crate::exec::plan::{ExecNode, ExecPlan, NodeBase, NodeRef};
use crate::runtime::mem_tracker::MemTracker;

struct SinkShared {
    queue: Arc<BatchQueue>,
    node: OnceLock<Weak<SinkNode>>,
}

/// Caller-facing half of a pull-style sink: a lazy batch channel that ends
/// with `None` or the plan's terminal error.
#[derive(Clone)]
pub struct SinkHandle {
    shared: Arc<SinkShared>,
}

impl SinkHandle {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SinkShared {
                queue: BatchQueue::new(),
                node: OnceLock::new(),
            }),
        }
    }

    /// Blocking pull of the next batch. Falling below the low-water mark
    /// resumes a paused upstream.
    pub fn recv(&self) -> Result<Option<Batch>> {
        let (result, remaining) = self.shared.queue.recv();
        if let Some(node) = self.shared.node.get().and_then(Weak::upgrade) {
            node.on_consumed(remaining, &result);
        }
        result
    }

    /// Drain the channel to completion.
    pub fn collect(&self) -> Result<Vec<Batch>> {
        let mut batches = Vec::new();
        while let Some(batch) = self.recv()? {
            batches.push(batch);
        }
        Ok(batches)
    }

    /// Queue shared with the sink node. The ordering sinks reuse the handle
    /// without watermark callbacks since they only emit after buffering
    /// everything.
    pub(crate) fn queue(&self) -> Arc<BatchQueue> {
        Arc::clone(&self.shared.queue)
    }
}

impl Default for SinkHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Options of the `sink` factory.
pub struct SinkNodeOptions {
    pub handle: SinkHandle,
}

impl SinkNodeOptions {
    pub fn new(handle: SinkHandle) -> Self {
        Self { handle }
    }
}

/// An ExecNode with no outputs exposing a pull channel to the caller.
pub struct SinkNode {
    base: NodeBase,
    shared: Arc<SinkShared>,
    capacity: usize,
    resume_watermark: usize,
    paused_upstream: AtomicBool,
    backpressure_counter: AtomicU64,
    mem_tracker: Arc<MemTracker>,
}

impl SinkNode {
    fn on_consumed(&self, remaining: usize, result: &Result<Option<Batch>>) {
        if let Ok(Some(batch)) = result {
            self.mem_tracker.release(batch.estimated_bytes() as i64);
        }
        if remaining <= self.resume_watermark
            && self.paused_upstream.swap(false, Ordering::AcqRel)
        {
            let counter = self.backpressure_counter.fetch_add(1, Ordering::AcqRel) + 1;
            let Some(me) = self.base.self_node() else {
                return;
            };
            if let Some(input) = self.base.input(0) {
                debug!("sink {} resuming upstream: counter={}", self.label(), counter);
                input.resume_producing(&me, counter);
            }
        }
    }
}

impl ExecNode for SinkNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn start_producing(&self) -> Result<()> {
        Ok(())
    }

    fn input_received(&self, _sender: &NodeRef, batch: Batch) {
        self.mem_tracker.consume(batch.estimated_bytes() as i64);
        let Some(len) = self.shared.queue.push(batch) else {
            return;
        };
        if len >= self.capacity && !self.paused_upstream.swap(true, Ordering::AcqRel) {
            let counter = self.backpressure_counter.fetch_add(1, Ordering::AcqRel) + 1;
            let Some(me) = self.base.self_node() else {
                return;
            };
            if let Some(input) = self.base.input(0) {
                debug!(
                    "sink {} pausing upstream: buffered={} counter={}",
                    self.label(),
                    len,
                    counter
                );
                input.pause_producing(&me, counter);
            }
        }
    }

    fn input_finished(&self, _sender: &NodeRef, _total_batches: usize) {
        self.shared.queue.close();
        self.base.finished().settle(Ok(()));
    }

    fn error_received(&self, _sender: &NodeRef, error: EngineError) {
        self.base.mark_errored();
        self.shared.queue.fail(error.clone());
        self.base.finished().settle(Err(error));
    }

    fn stop_producing(&self) {
        self.shared.queue.close();
        self.base.finished().settle(Ok(()));
    }
}

pub(crate) fn make_sink_node(
    plan: &ExecPlan,
    inputs: Vec<NodeRef>,
    options: &NodeOptions,
    label: &str,
) -> Result<NodeRef> {
    super::expect_input_count("sink", &inputs, 1)?;
    let options = typed_options::<SinkNodeOptions>(options, "sink")?;
    let shared = Arc::clone(&options.handle.shared);
    let node = Arc::new(SinkNode {
        base: NodeBase::new(
            "SinkNode",
            Arc::new(Schema::empty()),
            inputs,
            vec!["collected".to_string()],
            0,
        ),
        shared: Arc::clone(&shared),
        capacity: config::sink_buffer_capacity(),
        resume_watermark: config::sink_resume_watermark(),
        paused_upstream: AtomicBool::new(false),
        backpressure_counter: AtomicU64::new(0),
        mem_tracker: MemTracker::new_child("SinkNode", plan.context().mem_tracker()),
    });
    let _ = shared.node.set(Arc::downgrade(&node));
    Ok(plan.add_node(node, label))
}
