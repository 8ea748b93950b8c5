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
//! Project node: evaluates N expressions per batch into N output columns.
//! Output column names default to each expression's textual form.

use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};

use crate::common::error::{EngineError, Result};
use crate::exec::batch::{Batch, Column};
use crate::exec::expr::{ExprArena, ExprId};
use crate::exec::plan::declare::{typed_options, NodeOptions};
use crate::exec::plan::{ExecNode, ExecPlan, NodeBase, NodeRef};

/// Options of the `project` factory. `names` may be empty (every column
/// named from its expression text) or one name per expression.
pub struct ProjectNodeOptions {
    pub arena: Arc<ExprArena>,
    pub exprs: Vec<ExprId>,
    pub names: Vec<String>,
}

impl ProjectNodeOptions {
    pub fn new(arena: Arc<ExprArena>, exprs: Vec<ExprId>) -> Self {
        Self {
            arena,
            exprs,
            names: Vec::new(),
        }
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = names;
        self
    }
}

pub struct ProjectNode {
    base: NodeBase,
    arena: Arc<ExprArena>,
    exprs: Vec<ExprId>,
    names: Vec<String>,
    input_schema: SchemaRef,
}

impl ProjectNode {
    fn apply(&self, batch: &Batch) -> Result<Batch> {
        let input = batch.to_record_batch(&self.input_schema)?;
        let mut columns = Vec::with_capacity(self.exprs.len());
        for expr in &self.exprs {
            columns.push(Column::Array(self.arena.eval(*expr, &input)?));
        }
        Batch::try_new(columns, batch.len())
    }
}

impl ExecNode for ProjectNode {
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
            Ok(projected) => self.base.emit(projected),
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
        Some(format!("projection=[{}]", self.names.join(", ")))
    }
}

pub(crate) fn make_project_node(
    plan: &ExecPlan,
    inputs: Vec<NodeRef>,
    options: &NodeOptions,
    label: &str,
) -> Result<NodeRef> {
    super::expect_input_count("project", &inputs, 1)?;
    let options = typed_options::<ProjectNodeOptions>(options, "project")?;
    if !options.names.is_empty() && options.names.len() != options.exprs.len() {
        return Err(EngineError::Invalid(format!(
            "project got {} names for {} expressions",
            options.names.len(),
            options.exprs.len()
        )));
    }
    let input_schema = inputs[0].output_schema();
    let names: Vec<String> = if options.names.is_empty() {
        options
            .exprs
            .iter()
            .map(|expr| options.arena.render(*expr))
            .collect()
    } else {
        options.names.clone()
    };
    let mut fields = Vec::with_capacity(options.exprs.len());
    for (expr, name) in options.exprs.iter().zip(names.iter()) {
        let data_type = options.arena.output_type(*expr, input_schema.as_ref())?;
        fields.push(Field::new(name, data_type, true));
    }
    let node = Arc::new(ProjectNode {
        base: NodeBase::new(
            "ProjectNode",
            Arc::new(Schema::new(fields)),
            inputs,
            vec!["target".to_string()],
            1,
        ),
        arena: Arc::clone(&options.arena),
        exprs: options.exprs.clone(),
        names,
        input_schema,
    });
    Ok(plan.add_node(node, label))
}
