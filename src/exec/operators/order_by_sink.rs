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
//! Order-by sink: buffers the full input, then emits one stably sorted
//! batch. Memory scales with total input size; buffered data is discarded
//! on error.

use std::sync::{Arc, Mutex};

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;

use crate::common::error::{EngineError, Result};
use crate::exec::batch::Batch;
use crate::exec::channel::BatchQueue;
use crate::exec::operators::sink::SinkHandle;
use crate::exec::plan::declare::{typed_options, NodeOptions};
use crate::exec::plan::{ExecNode, ExecPlan, NodeBase, NodeRef};
use crate::exec::sort::{sort_record_batch, SortOptions};
use crate::runtime::mem_tracker::MemTracker;

/// Options of the `order_by_sink` factory.
pub struct OrderBySinkNodeOptions {
    pub sort: SortOptions,
    pub handle: SinkHandle,
}

impl OrderBySinkNodeOptions {
    pub fn new(sort: SortOptions, handle: SinkHandle) -> Self {
        Self { sort, handle }
    }
}

pub struct OrderBySinkNode {
    base: NodeBase,
    sort: SortOptions,
    queue: Arc<BatchQueue>,
    buffer: Mutex<Vec<RecordBatch>>,
    mem_tracker: Arc<MemTracker>,
}

impl OrderBySinkNode {
    fn sorted_output(&self) -> Result<Option<Batch>> {
        let buffered = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *buffer)
        };
        if buffered.is_empty() {
            return Ok(None);
        }
        let schema = self.base.input(0).map(|input| input.output_schema());
        let Some(schema) = schema else {
            return Ok(None);
        };
        let combined = concat_batches(&schema, &buffered)?;
        let sorted = sort_record_batch(&combined, &self.sort)?;
        Ok(Some(Batch::from_record_batch(&sorted)))
    }
}

impl ExecNode for OrderBySinkNode {
    fn base(&self) -> &NodeBase {
        &self.base
    }

    fn start_producing(&self) -> Result<()> {
        Ok(())
    }

    fn input_received(&self, _sender: &NodeRef, batch: Batch) {
        if self.base.is_errored() {
            return;
        }
        let Some(input) = self.base.input(0) else {
            return;
        };
        match batch.to_record_batch(&input.output_schema()) {
            Ok(materialized) => {
                self.mem_tracker
                    .consume(batch.estimated_bytes() as i64);
                let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
                buffer.push(materialized);
            }
            Err(err) => {
                self.base.mark_errored();
                self.queue.fail(err.clone());
                self.base.finished().settle(Err(err));
            }
        }
    }

    fn input_finished(&self, _sender: &NodeRef, _total_batches: usize) {
        if self.base.is_errored() {
            return;
        }
        match self.sorted_output() {
            Ok(output) => {
                if let Some(batch) = output {
                    self.queue.push(batch);
                }
                self.queue.close();
                self.base.finished().settle(Ok(()));
            }
            Err(err) => {
                self.queue.fail(err.clone());
                self.base.finished().settle(Err(err));
            }
        }
        self.release_buffered();
    }

    fn error_received(&self, _sender: &NodeRef, error: EngineError) {
        self.base.mark_errored();
        // Buffered data is dropped; only results already pulled by the
        // caller remain valid.
        {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.clear();
        }
        self.release_buffered();
        self.queue.fail(error.clone());
        self.base.finished().settle(Err(error));
    }

    fn stop_producing(&self) {
        {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.clear();
        }
        self.release_buffered();
        self.queue.close();
        self.base.finished().settle(Ok(()));
    }

    fn render_extra(&self) -> Option<String> {
        Some(format!("by={{{}}}", self.sort.render()))
    }
}

impl OrderBySinkNode {
    fn release_buffered(&self) {
        let held = self.mem_tracker.current();
        self.mem_tracker.release(held);
    }
}

pub(crate) fn make_order_by_sink_node(
    plan: &ExecPlan,
    inputs: Vec<NodeRef>,
    options: &NodeOptions,
    label: &str,
) -> Result<NodeRef> {
    super::expect_input_count("order_by_sink", &inputs, 1)?;
    let options = typed_options::<OrderBySinkNodeOptions>(options, "order_by_sink")?;
    if options.sort.sort_keys.is_empty() {
        return Err(EngineError::Invalid(
            "order_by_sink requires at least one sort key".to_string(),
        ));
    }
    // Surface unknown sort keys at construction time.
    crate::exec::sort::converter_for_keys(
        inputs[0].output_schema().as_ref(),
        &options.sort.sort_keys,
        options.sort.null_placement,
    )?;
    let node = Arc::new(OrderBySinkNode {
        base: NodeBase::new(
            "OrderBySinkNode",
            Arc::new(arrow::datatypes::Schema::empty()),
            inputs,
            vec!["collected".to_string()],
            0,
        ),
        sort: options.sort.clone(),
        queue: options.handle.queue(),
        buffer: Mutex::new(Vec::new()),
        mem_tracker: MemTracker::new_child("OrderBySinkNode", plan.context().mem_tracker()),
    });
    Ok(plan.add_node(node, label))
}
