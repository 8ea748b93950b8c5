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
//! Source node: drains a batch generator onto scheduler work items.
//!
//! Responsibilities:
//! - Emits one batch per drain step with monotonically increasing indices,
//!   then reschedules itself, so sources interleave under the serial
//!   dispatcher and stay cancellable between batches.
//! - Parks while any downstream edge is paused and re-arms on the resume
//!   notification.
//!
//! Key exported interfaces:
//! - Types: `SourceNodeOptions`, `SourceNode`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use arrow::datatypes::SchemaRef;

use crate::basalt_logging::debug;
use crate::common::error::{EngineError, Result};
use crate::exec::batch::Batch;
use crate::exec::channel::{BatchGenerator, BoxedBatchGenerator};
use crate::exec::plan::declare::{typed_options, NodeOptions};
use crate::exec::plan::signal::Observable;
use crate::exec::plan::{ExecNode, ExecPlan, NodeBase, NodeRef, NodeState};

/// Options of the `source` factory: the output schema and the generator to
/// drain. The generator is consumed by the first node built from these
/// options.
pub struct SourceNodeOptions {
    pub schema: SchemaRef,
    generator: Mutex<Option<BoxedBatchGenerator>>,
}

impl SourceNodeOptions {
    pub fn new(schema: SchemaRef, generator: impl BatchGenerator + 'static) -> Self {
        Self {
            schema,
            generator: Mutex::new(Some(Box::new(generator))),
        }
    }

    fn take_generator(&self) -> Result<BoxedBatchGenerator> {
        let mut guard = self.generator.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .take()
            .ok_or_else(|| EngineError::Invalid("source generator already consumed".to_string()))
    }
}

struct SourceState {
    generator: BoxedBatchGenerator,
    finished_sent: bool,
}

/// An ExecNode with no inputs that originates batches.
pub struct SourceNode {
    base: NodeBase,
    me: OnceLock<Weak<SourceNode>>,
    plan_ctx: crate::runtime::context::ExecContext,
    state: Mutex<SourceState>,
    stop: AtomicBool,
    resume: Arc<Observable>,
}

impl SourceNode {
    fn schedule_drain(&self) {
        let Some(me) = self.me.get().cloned() else {
            return;
        };
        self.plan_ctx.scheduler().spawn(move || {
            if let Some(node) = me.upgrade() {
                node.drain_step();
            }
        });
    }

    /// One cooperative drain step: emit at most one batch, then yield back
    /// to the scheduler.
    fn drain_step(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.finished_sent {
            return;
        }
        if self.stop.load(Ordering::Acquire) || self.plan_ctx.is_cancelled() {
            state.finished_sent = true;
            drop(state);
            debug!("source {} stopped before exhausting its generator", self.label());
            self.base.finished().settle(Ok(()));
            return;
        }
        if self.base.any_output_paused() {
            let me = self.me.get().cloned();
            self.resume.add_observer(Box::new(move || {
                if let Some(node) = me.and_then(|me| me.upgrade()) {
                    node.schedule_drain();
                }
            }));
            // Re-check after registering so a racing resume cannot strand
            // the drain.
            if !self.base.any_output_paused() || self.stop.load(Ordering::Acquire) {
                self.resume.notify();
            }
            return;
        }
        match state.generator.next_batch() {
            Ok(Some(batch)) => {
                self.base.emit(batch);
                drop(state);
                self.schedule_drain();
            }
            Ok(None) => {
                state.finished_sent = true;
                drop(state);
                self.base.emit_finished();
                self.base.finished().settle(Ok(()));
            }
            Err(err) => {
                state.finished_sent = true;
                drop(state);
                self.base.emit_error(err.clone());
                self.base.finished().settle(Err(err));
            }
        }
    }
}

impl ExecNode for SourceNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn start_producing(&self) -> Result<()> {
        self.base.set_state(NodeState::Producing);
        self.schedule_drain();
        Ok(())
    }

    fn input_received(&self, _sender: &NodeRef, _batch: Batch) {
        debug!("source {} ignored an unexpected input batch", self.label());
    }

    fn input_finished(&self, _sender: &NodeRef, _total_batches: usize) {}

    fn error_received(&self, _sender: &NodeRef, _error: EngineError) {}

    fn stop_producing(&self) {
        self.stop.store(true, Ordering::Release);
        // Wake a parked drain so it can observe the stop flag.
        self.resume.notify();
        self.base.finished().settle(Ok(()));
    }

    fn pause_producing(&self, output: &NodeRef, counter: u64) {
        self.base.accept_backpressure(output, counter, true);
    }

    fn resume_producing(&self, output: &NodeRef, counter: u64) {
        if self.base.accept_backpressure(output, counter, false)
            && !self.base.any_output_paused()
        {
            self.resume.notify();
        }
    }
}

pub(crate) fn make_source_node(
    plan: &ExecPlan,
    inputs: Vec<NodeRef>,
    options: &NodeOptions,
    label: &str,
) -> Result<NodeRef> {
    super::expect_input_count("source", &inputs, 0)?;
    let options = typed_options::<SourceNodeOptions>(options, "source")?;
    let generator = options.take_generator()?;
    let node = Arc::new(SourceNode {
        base: NodeBase::new(
            "SourceNode",
            Arc::clone(&options.schema),
            Vec::new(),
            Vec::new(),
            1,
        ),
        me: OnceLock::new(),
        plan_ctx: plan.context().clone(),
        state: Mutex::new(SourceState {
            generator,
            finished_sent: false,
        }),
        stop: AtomicBool::new(false),
        resume: Observable::new(),
    });
    let _ = node.me.set(Arc::downgrade(&node));
    Ok(plan.add_node(node, label))
}
