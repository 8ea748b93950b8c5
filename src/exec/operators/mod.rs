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
//! Relational operator implementations and their factory registrations.

pub mod aggregate;
pub mod consuming_sink;
pub mod filter;
pub mod hashjoin;
pub mod order_by_sink;
pub mod project;
pub mod select_k_sink;
pub mod sink;
pub mod source;
pub mod union;

pub use aggregate::{AggregateNodeOptions, AggregateSpec};
pub use consuming_sink::{ConsumingSinkNodeOptions, SinkConsumer};
pub use filter::FilterNodeOptions;
pub use hashjoin::{HashJoinNodeOptions, JoinType};
pub use order_by_sink::OrderBySinkNodeOptions;
pub use project::ProjectNodeOptions;
pub use select_k_sink::{SelectKOptions, SelectKSinkNodeOptions};
pub use sink::{SinkHandle, SinkNodeOptions};
pub use source::SourceNodeOptions;
pub use union::UnionNodeOptions;

use crate::exec::plan::declare::FactoryRegistry;

/// Populate the registry with the built-in factory names. Names are
/// wire-level identifiers and case-sensitive.
pub(crate) fn register_all(registry: &mut FactoryRegistry) {
    registry.register("source", source::make_source_node);
    registry.register("sink", sink::make_sink_node);
    registry.register("consuming_sink", consuming_sink::make_consuming_sink_node);
    registry.register("filter", filter::make_filter_node);
    registry.register("project", project::make_project_node);
    registry.register("aggregate", aggregate::make_aggregate_node);
    registry.register("order_by_sink", order_by_sink::make_order_by_sink_node);
    registry.register("select_k_sink", select_k_sink::make_select_k_sink_node);
    registry.register("hashjoin", hashjoin::make_hashjoin_node);
    registry.register("union", union::make_union_node);
}

pub(crate) fn expect_input_count(
    factory: &str,
    inputs: &[crate::exec::plan::NodeRef],
    expected: usize,
) -> crate::common::error::Result<()> {
    if inputs.len() != expected {
        return Err(crate::common::error::EngineError::Invalid(format!(
            "factory {factory} expects {expected} input(s), got {}",
            inputs.len()
        )));
    }
    Ok(())
}
