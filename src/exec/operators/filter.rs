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
//! Filter node: row-level predicate evaluation.
//!
//! Responsibilities:
//! - Evaluates a boolean expression per batch and applies the selection
//!   mask with the Arrow filter kernel.
//! - Emits empty batches unchanged so downstream batch boundaries are
//!   preserved.

use std::sync::Arc;

use arrow::compute::filter_record_batch;
use arrow::datatypes::DataType;

use crate::common::error::{EngineError, Result};
use crate::exec::batch::Batch;
use crate::exec::expr::{ExprArena, ExprId};
use crate::exec::plan::declare::{typed_options, NodeOptions};
use crate::exec::plan::{ExecNode, ExecPlan, NodeBase, NodeRef};

/// Options of the `filter` factory: a boolean expression over the input
/// schema.
pub struct FilterNodeOptions {
    pub arena: Arc<ExprArena>,
    pub predicate: ExprId,
}

impl FilterNodeOptions {
    pub fn new(arena: Arc<ExprArena>, predicate: ExprId) -> Self {
        Self { arena, predicate }
    }
}

pub struct FilterNode {
    base: NodeBase,
    arena: Arc<ExprArena>,
    predicate: ExprId,
}

impl FilterNode {
    fn apply(&self, batch: &Batch) -> Result<Batch> {
        if batch.is_empty() {
            return Ok(batch.clone());
        }
        let input = batch.to_record_batch(&self.base.output_schema())?;
        let mask = self.arena.eval_mask(self.predicate, &input)?;
        let filtered = filter_record_batch(&input, &mask)?;
        Ok(Batch::from_record_batch(&filtered))
    }
}

impl ExecNode for FilterNode {
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
        match self.apply(&batch) {
            Ok(filtered) => self.base.emit(filtered),
            Err(err) => {
                self.base.emit_error(err.clone());
                self.base.finished().settle(Err(err));
            }
        }
    }

    fn input_finished(&self, _sender: &NodeRef, _total_batches: usize) {
        self.base.emit_finished();
        self.base.finished().settle(Ok(()));
    }

    fn error_received(&self, _sender: &NodeRef, error: EngineError) {
        self.base.emit_error(error.clone());
        self.base.finished().settle(Err(error));
    }

    fn stop_producing(&self) {
        self.base.finished().settle(Ok(()));
    }

    fn render_extra(&self) -> Option<String> {
        Some(format!("filter={}", self.arena.render(self.predicate)))
    }
}

pub(crate) fn make_filter_node(
    plan: &ExecPlan,
    inputs: Vec<NodeRef>,
    options: &NodeOptions,
    label: &str,
) -> Result<NodeRef> {
    super::expect_input_count("filter", &inputs, 1)?;
    let options = typed_options::<FilterNodeOptions>(options, "filter")?;
    let input_schema = inputs[0].output_schema();
    let predicate_type = options
        .arena
        .output_type(options.predicate, input_schema.as_ref())?;
    if predicate_type != DataType::Boolean {
        return Err(EngineError::Invalid(format!(
            "filter predicate must evaluate to boolean, got {predicate_type}"
        )));
    }
    let node = Arc::new(FilterNode {
        base: NodeBase::new(
            "FilterNode",
            input_schema,
            inputs,
            vec!["target".to_string()],
            1,
        ),
        arena: Arc::clone(&options.arena),
        predicate: options.predicate,
    });
    Ok(plan.add_node(node, label))
}
