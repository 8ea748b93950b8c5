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
//! Expression evaluation surface used by filter and project nodes.
//!
//! Responsibilities:
//! - Stores expression trees in an arena keyed by [`ExprId`] and evaluates
//!   them against record batches with Arrow compute kernels.
//! - Renders expressions to the textual form used in node display and as
//!   default projection column names.
//!
//! Current limitations:
//! - Implements only the expression shapes the engine's operators consume;
//!   richer expression languages plug in behind the same arena surface.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Datum, Float64Array, Int32Array, Int64Array, StringArray,
    UInt32Array, new_null_array,
};
use arrow::compute::kernels::{cmp, numeric};
use arrow::compute::{and_kleene, is_null, not, or_kleene, take};
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;

use crate::common::error::{EngineError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ExprId(pub usize);

#[derive(Clone, Debug)]
pub enum LiteralValue {
    Null(DataType),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl LiteralValue {
    fn data_type(&self) -> DataType {
        match self {
            LiteralValue::Null(dt) => dt.clone(),
            LiteralValue::Bool(_) => DataType::Boolean,
            LiteralValue::Int32(_) => DataType::Int32,
            LiteralValue::Int64(_) => DataType::Int64,
            LiteralValue::Float64(_) => DataType::Float64,
            LiteralValue::Utf8(_) => DataType::Utf8,
        }
    }

    fn to_array(&self) -> ArrayRef {
        match self {
            LiteralValue::Null(dt) => new_null_array(dt, 1),
            LiteralValue::Bool(v) => Arc::new(BooleanArray::from(vec![*v])),
            LiteralValue::Int32(v) => Arc::new(Int32Array::from(vec![*v])),
            LiteralValue::Int64(v) => Arc::new(Int64Array::from(vec![*v])),
            LiteralValue::Float64(v) => Arc::new(Float64Array::from(vec![*v])),
            LiteralValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str()])),
        }
    }

    fn render(&self) -> String {
        match self {
            LiteralValue::Null(_) => "null".to_string(),
            LiteralValue::Bool(v) => v.to_string(),
            LiteralValue::Int32(v) => v.to_string(),
            LiteralValue::Int64(v) => v.to_string(),
            LiteralValue::Float64(v) => v.to_string(),
            LiteralValue::Utf8(v) => format!("\"{v}\""),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ExprNode {
    Literal(LiteralValue),
    /// Reference to an input column by field name.
    Field(String),
    Add(ExprId, ExprId),
    Multiply(ExprId, ExprId),
    Eq(ExprId, ExprId),
    Ne(ExprId, ExprId),
    Lt(ExprId, ExprId),
    Le(ExprId, ExprId),
    Gt(ExprId, ExprId),
    Ge(ExprId, ExprId),
    And(ExprId, ExprId),
    Or(ExprId, ExprId),
    Not(ExprId),
    IsNull(ExprId),
}

/// Intermediate evaluation result that keeps scalar-ness so Arrow kernels
/// can broadcast literals against column arrays.
enum Evaluated {
    Array(ArrayRef),
    Scalar(ArrayRef),
}

impl Evaluated {
    fn is_scalar(&self) -> bool {
        matches!(self, Evaluated::Scalar(_))
    }

    fn values(&self) -> &ArrayRef {
        match self {
            Evaluated::Array(v) | Evaluated::Scalar(v) => v,
        }
    }
}

impl Datum for Evaluated {
    fn get(&self) -> (&dyn Array, bool) {
        match self {
            Evaluated::Array(v) => (v.as_ref(), false),
            Evaluated::Scalar(v) => (v.as_ref(), true),
        }
    }
}

/// Arena holding expression nodes, shared read-only by operators.
#[derive(Clone, Debug, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: ExprId) -> Option<&ExprNode> {
        self.nodes.get(id.0)
    }

    pub fn push(&mut self, node: ExprNode) -> ExprId {
        let id = ExprId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn field(&mut self, name: impl Into<String>) -> ExprId {
        self.push(ExprNode::Field(name.into()))
    }

    pub fn literal(&mut self, value: LiteralValue) -> ExprId {
        self.push(ExprNode::Literal(value))
    }

    pub fn literal_i32(&mut self, value: i32) -> ExprId {
        self.literal(LiteralValue::Int32(value))
    }

    pub fn literal_i64(&mut self, value: i64) -> ExprId {
        self.literal(LiteralValue::Int64(value))
    }

    pub fn literal_utf8(&mut self, value: impl Into<String>) -> ExprId {
        self.literal(LiteralValue::Utf8(value.into()))
    }

    pub fn add(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::Add(lhs, rhs))
    }

    pub fn multiply(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::Multiply(lhs, rhs))
    }

    pub fn eq(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::Eq(lhs, rhs))
    }

    pub fn ne(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::Ne(lhs, rhs))
    }

    pub fn lt(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::Lt(lhs, rhs))
    }

    pub fn le(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::Le(lhs, rhs))
    }

    pub fn gt(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::Gt(lhs, rhs))
    }

    pub fn ge(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::Ge(lhs, rhs))
    }

    pub fn and(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::And(lhs, rhs))
    }

    pub fn or(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(ExprNode::Or(lhs, rhs))
    }

    pub fn not(&mut self, child: ExprId) -> ExprId {
        self.push(ExprNode::Not(child))
    }

    pub fn is_null(&mut self, child: ExprId) -> ExprId {
        self.push(ExprNode::IsNull(child))
    }

    /// Evaluate an expression against a batch, returning an array of
    /// `batch.num_rows()` values (constant results are broadcast).
    pub fn eval(&self, id: ExprId, batch: &RecordBatch) -> Result<ArrayRef> {
        let evaluated = self.eval_node(id, batch)?;
        match evaluated {
            Evaluated::Array(values) => Ok(values),
            Evaluated::Scalar(value) => {
                if batch.num_rows() == 1 {
                    return Ok(value);
                }
                let indices = UInt32Array::from(vec![0u32; batch.num_rows()]);
                Ok(take(value.as_ref(), &indices, None)?)
            }
        }
    }

    /// Evaluate a boolean predicate to a selection mask.
    pub fn eval_mask(&self, id: ExprId, batch: &RecordBatch) -> Result<BooleanArray> {
        let values = self.eval(id, batch)?;
        values
            .as_any()
            .downcast_ref::<BooleanArray>()
            .cloned()
            .ok_or_else(|| {
                EngineError::Execution(format!(
                    "predicate evaluated to {} instead of boolean",
                    values.data_type()
                ))
            })
    }

    fn eval_node(&self, id: ExprId, batch: &RecordBatch) -> Result<Evaluated> {
        let node = self.expect_node(id)?;
        match node {
            ExprNode::Literal(value) => Ok(Evaluated::Scalar(value.to_array())),
            ExprNode::Field(name) => {
                let column = batch.column_by_name(name).ok_or_else(|| {
                    EngineError::Execution(format!("field {name} not found in batch"))
                })?;
                Ok(Evaluated::Array(Arc::clone(column)))
            }
            ExprNode::Add(lhs, rhs) => self.eval_numeric(batch, *lhs, *rhs, numeric::add),
            ExprNode::Multiply(lhs, rhs) => self.eval_numeric(batch, *lhs, *rhs, numeric::mul),
            ExprNode::Eq(lhs, rhs) => self.eval_cmp(batch, *lhs, *rhs, cmp::eq),
            ExprNode::Ne(lhs, rhs) => self.eval_cmp(batch, *lhs, *rhs, cmp::neq),
            ExprNode::Lt(lhs, rhs) => self.eval_cmp(batch, *lhs, *rhs, cmp::lt),
            ExprNode::Le(lhs, rhs) => self.eval_cmp(batch, *lhs, *rhs, cmp::lt_eq),
            ExprNode::Gt(lhs, rhs) => self.eval_cmp(batch, *lhs, *rhs, cmp::gt),
            ExprNode::Ge(lhs, rhs) => self.eval_cmp(batch, *lhs, *rhs, cmp::gt_eq),
            ExprNode::And(lhs, rhs) => self.eval_logical(batch, *lhs, *rhs, and_kleene),
            ExprNode::Or(lhs, rhs) => self.eval_logical(batch, *lhs, *rhs, or_kleene),
            ExprNode::Not(child) => {
                let child = self.eval_bool(*child, batch)?;
                let negated: ArrayRef = Arc::new(not(&child.values)?);
                Ok(wrap(negated, child.scalar))
            }
            ExprNode::IsNull(child) => {
                let child = self.eval_node(*child, batch)?;
                let mask: ArrayRef = Arc::new(is_null(child.values().as_ref())?);
                Ok(wrap(mask, child.is_scalar()))
            }
        }
    }

    fn eval_numeric(
        &self,
        batch: &RecordBatch,
        lhs: ExprId,
        rhs: ExprId,
        kernel: fn(&dyn Datum, &dyn Datum) -> arrow::error::Result<ArrayRef>,
    ) -> Result<Evaluated> {
        let lhs = self.eval_node(lhs, batch)?;
        let rhs = self.eval_node(rhs, batch)?;
        let result = kernel(&lhs, &rhs)?;
        Ok(wrap(result, lhs.is_scalar() && rhs.is_scalar()))
    }

    fn eval_cmp(
        &self,
        batch: &RecordBatch,
        lhs: ExprId,
        rhs: ExprId,
        kernel: fn(&dyn Datum, &dyn Datum) -> arrow::error::Result<BooleanArray>,
    ) -> Result<Evaluated> {
        let lhs = self.eval_node(lhs, batch)?;
        let rhs = self.eval_node(rhs, batch)?;
        let result: ArrayRef = Arc::new(kernel(&lhs, &rhs)?);
        Ok(wrap(result, lhs.is_scalar() && rhs.is_scalar()))
    }

    fn eval_logical(
        &self,
        batch: &RecordBatch,
        lhs: ExprId,
        rhs: ExprId,
        kernel: fn(&BooleanArray, &BooleanArray) -> arrow::error::Result<BooleanArray>,
    ) -> Result<Evaluated> {
        let lhs = self.eval_bool(lhs, batch)?;
        let rhs = self.eval_bool(rhs, batch)?;
        if lhs.values.len() != rhs.values.len() {
            // Broadcast the scalar side before applying the kernel.
            let rows = lhs.values.len().max(rhs.values.len());
            let lhs = broadcast_bool(&lhs, rows)?;
            let rhs = broadcast_bool(&rhs, rows)?;
            let result: ArrayRef = Arc::new(kernel(&lhs, &rhs)?);
            return Ok(Evaluated::Array(result));
        }
        let scalar = lhs.scalar && rhs.scalar;
        let result: ArrayRef = Arc::new(kernel(&lhs.values, &rhs.values)?);
        Ok(wrap(result, scalar))
    }

    fn eval_bool(&self, id: ExprId, batch: &RecordBatch) -> Result<EvaluatedBool> {
        let evaluated = self.eval_node(id, batch)?;
        let scalar = evaluated.is_scalar();
        let values = evaluated
            .values()
            .as_any()
            .downcast_ref::<BooleanArray>()
            .cloned()
            .ok_or_else(|| {
                EngineError::Execution(format!(
                    "expected boolean operand, got {}",
                    evaluated.values().data_type()
                ))
            })?;
        Ok(EvaluatedBool { values, scalar })
    }

    /// Infer the output type of an expression against an input schema.
    pub fn output_type(&self, id: ExprId, schema: &Schema) -> Result<DataType> {
        let node = self.expect_node(id)?;
        match node {
            ExprNode::Literal(value) => Ok(value.data_type()),
            ExprNode::Field(name) => schema
                .field_with_name(name)
                .map(|f| f.data_type().clone())
                .map_err(|_| EngineError::Invalid(format!("field {name} not found in schema"))),
            ExprNode::Add(lhs, rhs) | ExprNode::Multiply(lhs, rhs) => {
                let lhs = self.output_type(*lhs, schema)?;
                let rhs = self.output_type(*rhs, schema)?;
                if lhs != rhs {
                    return Err(EngineError::Invalid(format!(
                        "mismatched arithmetic operand types {lhs} and {rhs}"
                    )));
                }
                Ok(lhs)
            }
            ExprNode::Eq(lhs, rhs)
            | ExprNode::Ne(lhs, rhs)
            | ExprNode::Lt(lhs, rhs)
            | ExprNode::Le(lhs, rhs)
            | ExprNode::Gt(lhs, rhs)
            | ExprNode::Ge(lhs, rhs)
            | ExprNode::And(lhs, rhs)
            | ExprNode::Or(lhs, rhs) => {
                self.output_type(*lhs, schema)?;
                self.output_type(*rhs, schema)?;
                Ok(DataType::Boolean)
            }
            ExprNode::Not(child) | ExprNode::IsNull(child) => {
                self.output_type(*child, schema)?;
                Ok(DataType::Boolean)
            }
        }
    }

    /// Textual form of an expression, used in node display and as default
    /// projection column names.
    pub fn render(&self, id: ExprId) -> String {
        let Some(node) = self.nodes.get(id.0) else {
            return format!("<expr {}>", id.0);
        };
        match node {
            ExprNode::Literal(value) => value.render(),
            ExprNode::Field(name) => name.clone(),
            ExprNode::Add(lhs, rhs) => format!("add({}, {})", self.render(*lhs), self.render(*rhs)),
            ExprNode::Multiply(lhs, rhs) => {
                format!("multiply({}, {})", self.render(*lhs), self.render(*rhs))
            }
            ExprNode::Eq(lhs, rhs) => format!("({} == {})", self.render(*lhs), self.render(*rhs)),
            ExprNode::Ne(lhs, rhs) => format!("({} != {})", self.render(*lhs), self.render(*rhs)),
            ExprNode::Lt(lhs, rhs) => format!("({} < {})", self.render(*lhs), self.render(*rhs)),
            ExprNode::Le(lhs, rhs) => format!("({} <= {})", self.render(*lhs), self.render(*rhs)),
            ExprNode::Gt(lhs, rhs) => format!("({} > {})", self.render(*lhs), self.render(*rhs)),
            ExprNode::Ge(lhs, rhs) => format!("({} >= {})", self.render(*lhs), self.render(*rhs)),
            ExprNode::And(lhs, rhs) => {
                format!("({} and {})", self.render(*lhs), self.render(*rhs))
            }
            ExprNode::Or(lhs, rhs) => format!("({} or {})", self.render(*lhs), self.render(*rhs)),
            ExprNode::Not(child) => format!("!{}", self.render(*child)),
            ExprNode::IsNull(child) => format!("is_null({})", self.render(*child)),
        }
    }

    fn expect_node(&self, id: ExprId) -> Result<&ExprNode> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| EngineError::Invalid(format!("unknown expression id {}", id.0)))
    }
}

struct EvaluatedBool {
    values: BooleanArray,
    scalar: bool,
}

fn wrap(values: ArrayRef, scalar: bool) -> Evaluated {
    if scalar {
        Evaluated::Scalar(values)
    } else {
        Evaluated::Array(values)
    }
}

fn broadcast_bool(value: &EvaluatedBool, rows: usize) -> Result<BooleanArray> {
    if value.values.len() == rows {
        return Ok(value.values.clone());
    }
    let indices = UInt32Array::from(vec![0u32; rows]);
    let array = take(&value.values, &indices, None)?;
    array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .cloned()
        .ok_or_else(|| EngineError::Execution("broadcast produced non-boolean array".to_string()))
}
