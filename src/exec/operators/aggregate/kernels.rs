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
//! Aggregate kernels.
//!
//! Responsibilities:
//! - Implements the associative/commutative accumulators behind the
//!   `sum`/`count`/`any`/`all`/`min`/`max`/`mean` aggregate names and their
//!   `hash_*` grouped forms.
//! - Each kernel carries partial state that updates per batch and merges
//!   with sibling partials before finalizing to a length-1 array.

use std::any::Any;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray,
};
use arrow::compute::{
    bool_and, bool_or, cast, max as arrow_max, max_boolean, max_string, min as arrow_min,
    min_boolean, min_string, sum,
};
use arrow::datatypes::DataType;

use crate::common::error::{EngineError, Result};

/// Count mode: whether nulls contribute to the count.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CountMode {
    NonNull,
    All,
}

/// Typed per-kernel options, preserved across per-thread state
/// initialization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AggOptions {
    Count { mode: CountMode },
}

impl AggOptions {
    pub(crate) fn render(&self) -> String {
        match self {
            AggOptions::Count {
                mode: CountMode::NonNull,
            } => "{mode=NON_NULL}".to_string(),
            AggOptions::Count {
                mode: CountMode::All,
            } => "{mode=ALL}".to_string(),
        }
    }
}

/// One aggregate accumulator. `update` folds in a batch column, `merge`
/// folds in a sibling partial state, `finalize` emits a length-1 array.
pub trait AggKernel: Send {
    fn update(&mut self, values: &ArrayRef) -> Result<()>;
    fn merge(&mut self, other: &dyn AggKernel) -> Result<()>;
    fn finalize(&mut self) -> Result<ArrayRef>;
    fn as_any(&self) -> &dyn Any;
}

impl std::fmt::Debug for dyn AggKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AggKernel")
    }
}

/// Grouped kernel names carry a `hash_` prefix distinguishing them from the
/// scalar forms.
pub fn is_hash_kernel(name: &str) -> bool {
    name.starts_with("hash_")
}

pub fn scalar_kernel_name(name: &str) -> &str {
    name.strip_prefix("hash_").unwrap_or(name)
}

/// Output type of a kernel applied to `input`.
pub fn kernel_output_type(name: &str, input: &DataType) -> Result<DataType> {
    match scalar_kernel_name(name) {
        "sum" => sum_accumulator_type(input),
        "count" => Ok(DataType::Int64),
        "any" | "all" => {
            expect_boolean(name, input)?;
            Ok(DataType::Boolean)
        }
        "min" | "max" => {
            scalar_acc_for(input)?;
            Ok(input.clone())
        }
        "mean" => {
            sum_accumulator_type(input)?;
            Ok(DataType::Float64)
        }
        other => Err(EngineError::NotImplemented(format!(
            "aggregate kernel {other} is not registered"
        ))),
    }
}

/// Build the accumulator behind a kernel name (scalar or `hash_` form).
pub fn build_kernel(
    name: &str,
    input: &DataType,
    options: Option<&AggOptions>,
) -> Result<Box<dyn AggKernel>> {
    match scalar_kernel_name(name) {
        "sum" => Ok(Box::new(SumKernel::new(input)?)),
        "count" => {
            let mode = match options {
                Some(AggOptions::Count { mode }) => *mode,
                None => CountMode::NonNull,
            };
            Ok(Box::new(CountKernel { mode, count: 0 }))
        }
        "any" => {
            expect_boolean(name, input)?;
            Ok(Box::new(AnyKernel { acc: None }))
        }
        "all" => {
            expect_boolean(name, input)?;
            Ok(Box::new(AllKernel { acc: None }))
        }
        "min" => Ok(Box::new(MinMaxKernel {
            acc: scalar_acc_for(input)?,
            is_min: true,
        })),
        "max" => Ok(Box::new(MinMaxKernel {
            acc: scalar_acc_for(input)?,
            is_min: false,
        })),
        "mean" => {
            sum_accumulator_type(input)?;
            Ok(Box::new(MeanKernel { sum: 0.0, count: 0 }))
        }
        other => Err(EngineError::NotImplemented(format!(
            "aggregate kernel {other} is not registered"
        ))),
    }
}

fn expect_boolean(name: &str, input: &DataType) -> Result<()> {
    if input != &DataType::Boolean {
        return Err(EngineError::Invalid(format!(
            "kernel {name} requires a boolean input, got {input}"
        )));
    }
    Ok(())
}

fn sum_accumulator_type(input: &DataType) -> Result<DataType> {
    match input {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => Ok(DataType::Int64),
        DataType::Float32 | DataType::Float64 => Ok(DataType::Float64),
        other => Err(EngineError::NotImplemented(format!(
            "sum over {other} is not supported"
        ))),
    }
}

enum SumAcc {
    Int(i64),
    Float(f64),
}

struct SumKernel {
    acc: SumAcc,
    seen: bool,
}

impl SumKernel {
    fn new(input: &DataType) -> Result<Self> {
        let acc = match sum_accumulator_type(input)? {
            DataType::Int64 => SumAcc::Int(0),
            _ => SumAcc::Float(0.0),
        };
        Ok(Self { acc, seen: false })
    }
}

impl AggKernel for SumKernel {
    fn update(&mut self, values: &ArrayRef) -> Result<()> {
        if values.len() == values.null_count() {
            return Ok(());
        }
        match &mut self.acc {
            SumAcc::Int(acc) => {
                let values = cast(values, &DataType::Int64)?;
                let values = downcast::<Int64Array>(&values)?;
                if let Some(partial) = sum(values) {
                    *acc += partial;
                    self.seen = true;
                }
            }
            SumAcc::Float(acc) => {
                let values = cast(values, &DataType::Float64)?;
                let values = downcast::<Float64Array>(&values)?;
                if let Some(partial) = sum(values) {
                    *acc += partial;
                    self.seen = true;
                }
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: &dyn AggKernel) -> Result<()> {
        let other = downcast_kernel::<SumKernel>(other)?;
        match (&mut self.acc, &other.acc) {
            (SumAcc::Int(acc), SumAcc::Int(partial)) => *acc += partial,
            (SumAcc::Float(acc), SumAcc::Float(partial)) => *acc += partial,
            _ => {
                return Err(EngineError::Execution(
                    "mismatched sum accumulator kinds".to_string(),
                ));
            }
        }
        self.seen |= other.seen;
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        Ok(match &self.acc {
            SumAcc::Int(acc) => {
                let value = self.seen.then_some(*acc);
                Arc::new(Int64Array::from(vec![value]))
            }
            SumAcc::Float(acc) => {
                let value = self.seen.then_some(*acc);
                Arc::new(Float64Array::from(vec![value]))
            }
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct CountKernel {
    mode: CountMode,
    count: i64,
}

impl AggKernel for CountKernel {
    fn update(&mut self, values: &ArrayRef) -> Result<()> {
        self.count += match self.mode {
            CountMode::NonNull => (values.len() - values.null_count()) as i64,
            CountMode::All => values.len() as i64,
        };
        Ok(())
    }

    fn merge(&mut self, other: &dyn AggKernel) -> Result<()> {
        let other = downcast_kernel::<CountKernel>(other)?;
        self.count += other.count;
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        Ok(Arc::new(Int64Array::from(vec![self.count])))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AnyKernel {
    acc: Option<bool>,
}

impl AggKernel for AnyKernel {
    fn update(&mut self, values: &ArrayRef) -> Result<()> {
        let values = downcast::<BooleanArray>(values)?;
        if let Some(partial) = bool_or(values) {
            self.acc = Some(self.acc.unwrap_or(false) || partial);
        }
        Ok(())
    }

    fn merge(&mut self, other: &dyn AggKernel) -> Result<()> {
        let other = downcast_kernel::<AnyKernel>(other)?;
        if let Some(partial) = other.acc {
            self.acc = Some(self.acc.unwrap_or(false) || partial);
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        Ok(Arc::new(BooleanArray::from(vec![self.acc.unwrap_or(false)])))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AllKernel {
    acc: Option<bool>,
}

impl AggKernel for AllKernel {
    fn update(&mut self, values: &ArrayRef) -> Result<()> {
        let values = downcast::<BooleanArray>(values)?;
        if let Some(partial) = bool_and(values) {
            self.acc = Some(self.acc.unwrap_or(true) && partial);
        }
        Ok(())
    }

    fn merge(&mut self, other: &dyn AggKernel) -> Result<()> {
        let other = downcast_kernel::<AllKernel>(other)?;
        if let Some(partial) = other.acc {
            self.acc = Some(self.acc.unwrap_or(true) && partial);
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        Ok(Arc::new(BooleanArray::from(vec![self.acc.unwrap_or(true)])))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

enum ScalarAcc {
    Int32(Option<i32>),
    Int64(Option<i64>),
    Float64(Option<f64>),
    Utf8(Option<String>),
    Boolean(Option<bool>),
}

fn scalar_acc_for(input: &DataType) -> Result<ScalarAcc> {
    Ok(match input {
        DataType::Int32 => ScalarAcc::Int32(None),
        DataType::Int64 => ScalarAcc::Int64(None),
        DataType::Float64 => ScalarAcc::Float64(None),
        DataType::Utf8 => ScalarAcc::Utf8(None),
        DataType::Boolean => ScalarAcc::Boolean(None),
        other => {
            return Err(EngineError::NotImplemented(format!(
                "min/max over {other} is not supported"
            )));
        }
    })
}

struct MinMaxKernel {
    acc: ScalarAcc,
    is_min: bool,
}

impl MinMaxKernel {
    fn fold<T: PartialOrd>(is_min: bool, acc: &mut Option<T>, partial: Option<T>) {
        let Some(partial) = partial else {
            return;
        };
        match acc.take() {
            None => *acc = Some(partial),
            Some(current) => {
                let keep_partial = if is_min {
                    partial < current
                } else {
                    partial > current
                };
                *acc = Some(if keep_partial { partial } else { current });
            }
        }
    }
}

impl AggKernel for MinMaxKernel {
    fn update(&mut self, values: &ArrayRef) -> Result<()> {
        let is_min = self.is_min;
        match &mut self.acc {
            ScalarAcc::Int32(acc) => {
                let values = downcast::<Int32Array>(values)?;
                let partial = if is_min {
                    arrow_min(values)
                } else {
                    arrow_max(values)
                };
                Self::fold(is_min, acc, partial);
            }
            ScalarAcc::Int64(acc) => {
                let values = downcast::<Int64Array>(values)?;
                let partial = if is_min {
                    arrow_min(values)
                } else {
                    arrow_max(values)
                };
                Self::fold(is_min, acc, partial);
            }
            ScalarAcc::Float64(acc) => {
                let values = downcast::<Float64Array>(values)?;
                let partial = if is_min {
                    arrow_min(values)
                } else {
                    arrow_max(values)
                };
                Self::fold(is_min, acc, partial);
            }
            ScalarAcc::Utf8(acc) => {
                let values = downcast::<StringArray>(values)?;
                let partial = if is_min {
                    min_string(values)
                } else {
                    max_string(values)
                };
                Self::fold(is_min, acc, partial.map(str::to_string));
            }
            ScalarAcc::Boolean(acc) => {
                let values = downcast::<BooleanArray>(values)?;
                let partial = if is_min {
                    min_boolean(values)
                } else {
                    max_boolean(values)
                };
                Self::fold(is_min, acc, partial);
            }
        }
        Ok(())
    }

    fn merge(&mut self, other: &dyn AggKernel) -> Result<()> {
        let other = downcast_kernel::<MinMaxKernel>(other)?;
        let is_min = self.is_min;
        match (&mut self.acc, &other.acc) {
            (ScalarAcc::Int32(acc), ScalarAcc::Int32(partial)) => {
                Self::fold(is_min, acc, *partial)
            }
            (ScalarAcc::Int64(acc), ScalarAcc::Int64(partial)) => {
                Self::fold(is_min, acc, *partial)
            }
            (ScalarAcc::Float64(acc), ScalarAcc::Float64(partial)) => {
                Self::fold(is_min, acc, *partial)
            }
            (ScalarAcc::Utf8(acc), ScalarAcc::Utf8(partial)) => {
                Self::fold(is_min, acc, partial.clone())
            }
            (ScalarAcc::Boolean(acc), ScalarAcc::Boolean(partial)) => {
                Self::fold(is_min, acc, *partial)
            }
            _ => {
                return Err(EngineError::Execution(
                    "mismatched min/max accumulator kinds".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        Ok(match &self.acc {
            ScalarAcc::Int32(acc) => Arc::new(Int32Array::from(vec![*acc])),
            ScalarAcc::Int64(acc) => Arc::new(Int64Array::from(vec![*acc])),
            ScalarAcc::Float64(acc) => Arc::new(Float64Array::from(vec![*acc])),
            ScalarAcc::Utf8(acc) => Arc::new(StringArray::from(vec![acc.clone()])),
            ScalarAcc::Boolean(acc) => Arc::new(BooleanArray::from(vec![*acc])),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MeanKernel {
    sum: f64,
    count: i64,
}

impl AggKernel for MeanKernel {
    fn update(&mut self, values: &ArrayRef) -> Result<()> {
        let non_null = values.len() - values.null_count();
        if non_null == 0 {
            return Ok(());
        }
        let values = cast(values, &DataType::Float64)?;
        let values = downcast::<Float64Array>(&values)?;
        if let Some(partial) = sum(values) {
            self.sum += partial;
            self.count += non_null as i64;
        }
        Ok(())
    }

    fn merge(&mut self, other: &dyn AggKernel) -> Result<()> {
        let other = downcast_kernel::<MeanKernel>(other)?;
        self.sum += other.sum;
        self.count += other.count;
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArrayRef> {
        let value = (self.count > 0).then(|| self.sum / self.count as f64);
        Ok(Arc::new(Float64Array::from(vec![value])))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn downcast<'a, T: Array + 'static>(values: &'a ArrayRef) -> Result<&'a T> {
    values.as_any().downcast_ref::<T>().ok_or_else(|| {
        EngineError::Execution(format!(
            "aggregate input has unexpected type {}",
            values.data_type()
        ))
    })
}

fn downcast_kernel<T: AggKernel + 'static>(kernel: &dyn AggKernel) -> Result<&T> {
    kernel.as_any().downcast_ref::<T>().ok_or_else(|| {
        EngineError::Execution("merged aggregate kernels have different types".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32(values: Vec<Option<i32>>) -> ArrayRef {
        Arc::new(Int32Array::from(values))
    }

    #[test]
    fn sum_widens_int32_to_int64_and_skips_nulls() {
        let mut kernel = build_kernel("sum", &DataType::Int32, None).expect("kernel");
        kernel
            .update(&int32(vec![Some(4), None, Some(5)]))
            .expect("update");
        kernel.update(&int32(vec![Some(6), Some(7)])).expect("update");
        let out = kernel.finalize().expect("finalize");
        let out = out.as_any().downcast_ref::<Int64Array>().expect("i64");
        assert_eq!(out.value(0), 22);
    }

    #[test]
    fn merge_combines_partial_states() {
        let mut left = build_kernel("hash_sum", &DataType::Int32, None).expect("kernel");
        let mut right = build_kernel("hash_sum", &DataType::Int32, None).expect("kernel");
        left.update(&int32(vec![Some(12), Some(3)])).expect("update");
        right.update(&int32(vec![Some(-2), Some(-8), Some(3)]))
            .expect("update");
        left.merge(right.as_ref()).expect("merge");
        let out = left.finalize().expect("finalize");
        let out = out.as_any().downcast_ref::<Int64Array>().expect("i64");
        assert_eq!(out.value(0), 8);
    }

    #[test]
    fn count_modes_differ_on_nulls() {
        let values = int32(vec![Some(1), None, Some(3)]);
        let mut non_null = build_kernel("count", &DataType::Int32, None).expect("kernel");
        non_null.update(&values).expect("update");
        let mut all = build_kernel(
            "count",
            &DataType::Int32,
            Some(&AggOptions::Count {
                mode: CountMode::All,
            }),
        )
        .expect("kernel");
        all.update(&values).expect("update");
        let non_null = non_null.finalize().expect("finalize");
        let all = all.finalize().expect("finalize");
        assert_eq!(
            non_null.as_any().downcast_ref::<Int64Array>().expect("i64").value(0),
            2
        );
        assert_eq!(
            all.as_any().downcast_ref::<Int64Array>().expect("i64").value(0),
            3
        );
    }

    #[test]
    fn any_ignores_nulls_and_defaults_to_false() {
        let mut kernel = build_kernel("any", &DataType::Boolean, None).expect("kernel");
        let values: ArrayRef = Arc::new(BooleanArray::from(vec![None, Some(false)]));
        kernel.update(&values).expect("update");
        let out = kernel.finalize().expect("finalize");
        let out = out.as_any().downcast_ref::<BooleanArray>().expect("bool");
        assert!(!out.value(0));
    }

    #[test]
    fn unknown_kernel_is_not_implemented() {
        let err = build_kernel("median", &DataType::Int32, None).expect_err("unknown");
        assert!(matches!(err, EngineError::NotImplemented(_)));
    }
}
