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
//! Union node: passes batches from all inputs through without reordering
//! or synchronization. The output reports finished only after every input
//! has reported.

use std::sync::{Arc, Mutex};

use crate::common::error::{EngineError, Result};
use crate::exec::batch::Batch;
use crate::exec::plan::declare::{typed_options, NodeOptions};
use crate::exec::plan::{ExecNode, ExecPlan, NodeBase, NodeRef};

/// Options of the `union` factory. The node has no parameters; the input
/// schemas must agree.
#[derive(Default)]
pub struct UnionNodeOptions {}

pub struct UnionNode {
    base: NodeBase,
    finished_inputs: Mutex<usize>,
}

impl ExecNode for UnionNode {
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
        self.base.emit(batch);
    }

    fn input_finished(&self, _sender: &NodeRef, _total_batches: usize) {
        let all_reported = {
            let mut finished = self.finished_inputs.lock().unwrap_or_else(|e| e.into_inner());
            *finished += 1;
            *finished == self.base.inputs().len()
        };
        if all_reported {
            self.base.emit_finished();
            self.base.finished().settle(Ok(()));
        }
    }

    fn error_received(&self, _sender: &NodeRef, error: EngineError) {
        self.base.emit_error(error.clone());
        self.base.finished().settle(Err(error));
    }

    fn stop_producing(&self) {
        self.base.finished().settle(Ok(()));
    }
}

pub(crate) fn make_union_node(
    plan: &ExecPlan,
    inputs: Vec<NodeRef>,
    options: &NodeOptions,
    label: &str,
) -> Result<NodeRef> {
    if inputs.is_empty() {
        return Err(EngineError::Invalid(
            "union requires at least one input".to_string(),
        ));
    }
    let _ = typed_options::<UnionNodeOptions>(options, "union")?;
    let schema = inputs[0].output_schema();
    for input in &inputs[1..] {
        if input.output_schema() != schema {
            return Err(EngineError::Invalid(
                "union inputs must share one schema".to_string(),
            ));
        }
    }
    let node = Arc::new(UnionNode {
        base: NodeBase::new("UnionNode", schema, inputs, Vec::new(), 1),
        finished_inputs: Mutex::new(0),
    });
    Ok(plan.add_node(node, label))
}
