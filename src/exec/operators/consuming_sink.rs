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
//! Consuming sink node: hands batches to a user-provided consumer.

use std::sync::Arc;

use arrow::datatypes::Schema;

use crate::common::error::{EngineError, Result};
use crate::exec::batch::Batch;
use crate::exec::plan::declare::{typed_options, NodeOptions};
use crate::exec::plan::signal::FinishSignal;
use crate::exec::plan::{ExecNode, ExecPlan, NodeBase, NodeRef};

/// User-side consumer of a plan's output.
///
/// `consume` is called once per batch, serialized per upstream edge, and may
/// fail; the failure becomes the plan's terminal error. `finish` returns a
/// completion signal the plan waits on before finishing.
pub trait SinkConsumer: Send + Sync {
    fn consume(&self, batch: &Batch) -> Result<()>;
    fn finish(&self) -> Arc<FinishSignal>;
}

/// Options of the `consuming_sink` factory.
pub struct ConsumingSinkNodeOptions {
    pub consumer: Arc<dyn SinkConsumer>,
}

impl ConsumingSinkNodeOptions {
    pub fn new(consumer: Arc<dyn SinkConsumer>) -> Self {
        Self { consumer }
    }
}

pub struct ConsumingSinkNode {
    base: NodeBase,
    consumer: Arc<dyn SinkConsumer>,
}

impl ExecNode for ConsumingSinkNode {
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
        if let Err(err) = self.consumer.consume(&batch) {
            // A consumer failure is reported the same way an upstream error
            // would be: the node delivers it to itself.
            let Some(me) = self.base.self_node() else {
                return;
            };
            self.error_received(&me, err);
        }
    }

    fn input_finished(&self, _sender: &NodeRef, _total_batches: usize) {
        if self.base.is_errored() {
            return;
        }
        let completion = self.consumer.finish();
        let finished = self.base.finished();
        let observed = Arc::clone(&completion);
        completion.add_observer(Box::new(move || {
            let status = observed.peek().unwrap_or(Ok(()));
            finished.settle(status);
        }));
    }

    fn error_received(&self, _sender: &NodeRef, error: EngineError) {
        self.base.mark_errored();
        self.base.finished().settle(Err(error));
    }

    fn stop_producing(&self) {
        self.base.finished().settle(Ok(()));
    }
}

pub(crate) fn make_consuming_sink_node(
    plan: &ExecPlan,
    inputs: Vec<NodeRef>,
    options: &NodeOptions,
    label: &str,
) -> Result<NodeRef> {
    super::expect_input_count("consuming_sink", &inputs, 1)?;
    let options = typed_options::<ConsumingSinkNodeOptions>(options, "consuming_sink")?;
    let node = Arc::new(ConsumingSinkNode {
        base: NodeBase::new(
            "ConsumingSinkNode",
            Arc::new(Schema::empty()),
            inputs,
            vec!["collected".to_string()],
            0,
        ),
        consumer: Arc::clone(&options.consumer),
    });
    Ok(plan.add_node(node, label))
}
