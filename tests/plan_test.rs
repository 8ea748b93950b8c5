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
//! Plan construction, validation, lifecycle ordering, and rendering tests.

mod common;

use std::sync::Arc;

use basalt::exec::expr::ExprArena;
use basalt::exec::operators::{
    AggregateNodeOptions, AggregateSpec, FilterNodeOptions, ProjectNodeOptions, SinkHandle,
    SinkNodeOptions, UnionNodeOptions,
};
use basalt::exec::operators::aggregate::{AggOptions, CountMode};
use basalt::exec::operators::OrderBySinkNodeOptions;
use basalt::exec::plan::declare::Declaration;
use basalt::exec::plan::ExecPlan;
use basalt::exec::sort::{SortKey, SortOptions};
use basalt::EngineError;

use common::{basic_batches, make_dummy_node, StartStopTracker};

fn node_ids(nodes: &[basalt::NodeRef]) -> Vec<String> {
    nodes.iter().map(|n| n.label()).collect()
}

#[test]
fn empty_plan_is_invalid() {
    let plan = ExecPlan::make_default();
    assert!(matches!(plan.validate(), Err(EngineError::Invalid(_))));
}

#[test]
fn single_node_is_both_source_and_sink() {
    let plan = ExecPlan::make_default();
    let node = make_dummy_node(&plan, "dummy", vec![], 0);
    plan.validate().expect("valid");
    assert_eq!(node_ids(&plan.sources()), vec![node.label()]);
    assert_eq!(node_ids(&plan.sinks()), vec![node.label()]);

    let plan = ExecPlan::make_default();
    make_dummy_node(&plan, "dummy", vec![], 1);
    // Output not bound
    assert!(matches!(plan.validate(), Err(EngineError::Invalid(_))));
}

#[test]
fn source_sink_topology() {
    let plan = ExecPlan::make_default();
    let source = make_dummy_node(&plan, "source", vec![], 1);
    let sink = make_dummy_node(&plan, "sink", vec![source.clone()], 0);
    plan.validate().expect("valid");
    assert_eq!(node_ids(&plan.sources()), vec!["source"]);
    assert_eq!(node_ids(&plan.sinks()), vec!["sink"]);
    assert_eq!(sink.base().inputs().len(), 1);
}

#[test]
fn multiple_node_topology() {
    let plan = ExecPlan::make_default();
    let source1 = make_dummy_node(&plan, "source1", vec![], 2);
    let source2 = make_dummy_node(&plan, "source2", vec![], 1);
    let process1 = make_dummy_node(&plan, "process1", vec![source1.clone()], 2);
    let process2 =
        make_dummy_node(&plan, "process1", vec![source1.clone(), source2.clone()], 1);
    let process3 = make_dummy_node(
        &plan,
        "process3",
        vec![process1.clone(), process2.clone(), process1.clone()],
        1,
    );
    make_dummy_node(&plan, "sink", vec![process3], 0);

    plan.validate().expect("valid");
    assert_eq!(node_ids(&plan.sources()), vec!["source1", "source2"]);
    assert_eq!(node_ids(&plan.sinks()), vec!["sink"]);
}

#[test]
fn auto_labels_use_insertion_ordinals() {
    let plan = ExecPlan::make_default();
    let source1 = make_dummy_node(&plan, "", vec![], 2);
    let source2 = make_dummy_node(&plan, "some_label", vec![], 1);
    let source3 = make_dummy_node(&plan, "", vec![], 2);
    assert_eq!(source1.label(), "0");
    assert_eq!(source2.label(), "some_label");
    assert_eq!(source3.label(), "2");
}

#[test]
fn inputs_must_belong_to_the_same_plan() {
    let foreign_plan = ExecPlan::make_default();
    let foreign = make_dummy_node(&foreign_plan, "foreign", vec![], 1);

    let plan = ExecPlan::make_default();
    make_dummy_node(&plan, "sink", vec![foreign], 0);
    assert!(matches!(plan.validate(), Err(EngineError::Invalid(_))));
}

fn build_tracked_plan(tracker: &StartStopTracker, plan: &ExecPlan) {
    let source1 = tracker.node(plan, "source1", vec![], 2);
    let source2 = tracker.node(plan, "source2", vec![], 1);
    let process1 = tracker.node(plan, "process1", vec![source1.clone()], 2);
    let process2 = tracker.node(plan, "process2", vec![process1.clone(), source2], 1);
    let process3 = tracker.node(plan, "process3", vec![process1, source1, process2], 1);
    tracker.node(plan, "sink", vec![process3], 0);
}

#[test]
fn start_is_reverse_topological_and_stop_is_topological() {
    let tracker = StartStopTracker::default();
    let plan = ExecPlan::make_default();
    build_tracked_plan(&tracker, &plan);

    plan.validate().expect("valid");
    assert!(tracker.started().is_empty());
    assert!(tracker.stopped().is_empty());

    plan.start_producing().expect("start");
    // Note that any correct reverse topological order may do
    assert_eq!(
        tracker.started(),
        vec!["sink", "process3", "process2", "process1", "source2", "source1"]
    );

    plan.stop_producing();
    plan.finished().wait().expect("finished");
    // Note that any correct topological order may do
    assert_eq!(
        tracker.stopped(),
        vec!["source1", "source2", "process1", "process2", "process3", "sink"]
    );

    let err = plan.start_producing().expect_err("second start");
    match err {
        EngineError::Invalid(message) => assert!(message.contains("restarted")),
        other => panic!("expected Invalid, got {other:?}"),
    }
}

#[test]
fn failed_start_unwinds_started_nodes_in_reverse_order() {
    let tracker = StartStopTracker::default();
    let plan = ExecPlan::make_default();

    let source1 = tracker.node_with_start_result(
        &plan,
        "source1",
        vec![],
        2,
        Err(EngineError::NotImplemented("zzz".to_string())),
    );
    let source2 = tracker.node(&plan, "source2", vec![], 1);
    let process1 = tracker.node_with_start_result(
        &plan,
        "process1",
        vec![source1.clone()],
        2,
        Err(EngineError::IoError("xxx".to_string())),
    );
    let process2 = tracker.node(&plan, "process2", vec![process1.clone(), source2], 1);
    let process3 = tracker.node(&plan, "process3", vec![process1, source1, process2], 1);
    tracker.node(&plan, "sink", vec![process3], 0);

    plan.validate().expect("valid");

    // `process1` raises IOError before either source is reached.
    let err = plan.start_producing().expect_err("start fails");
    assert!(matches!(err, EngineError::IoError(_)));
    assert_eq!(
        tracker.started(),
        vec!["sink", "process3", "process2", "process1"]
    );
    // Nodes that started successfully were stopped in reverse order.
    assert_eq!(tracker.stopped(), vec!["process2", "process3", "sink"]);
}

#[test]
fn unknown_factory_name_is_invalid() {
    let plan = ExecPlan::make_default();
    let declaration = Declaration::new("no_such_factory", UnionNodeOptions::default());
    let err = declaration.add_to_plan(&plan).expect_err("unknown factory");
    assert!(matches!(err, EngineError::Invalid(_)));
}

#[test]
fn source_sink_to_string() {
    let basic = basic_batches();
    let handle = SinkHandle::new();
    let plan = ExecPlan::make_default();
    Declaration::sequence(vec![
        Declaration::new("source", basic.source_options(false)),
        Declaration::new("sink", SinkNodeOptions::new(handle)),
    ])
    .add_to_plan(&plan)
    .expect("plan built");

    assert_eq!(
        plan.sources()[0].to_node_string(),
        r#"SourceNode{"source", outputs=["sink"]}"#
    );
    assert_eq!(
        plan.sinks()[0].to_node_string(),
        r#"SinkNode{"sink", inputs=[collected: "source"]}"#
    );
    assert_eq!(
        plan.to_string(),
        r#"ExecPlan with 2 nodes:
SourceNode{"source", outputs=["sink"]}
SinkNode{"sink", inputs=[collected: "source"]}
"#
    );
}

#[test]
fn grouped_pipeline_to_string() {
    let basic = basic_batches();
    let handle = SinkHandle::new();
    let plan = ExecPlan::make_default();

    let mut arena = ExprArena::new();
    let i32_field = arena.field("i32");
    let zero = arena.literal_i32(0);
    let first_predicate = arena.ge(i32_field, zero);
    let bool_field = arena.field("bool");
    let two = arena.literal_i32(2);
    let i32_again = arena.field("i32");
    let product = arena.multiply(i32_again, two);
    let sum_field = arena.field("sum(multiply(i32, 2))");
    let ten = arena.literal_i64(10);
    let second_predicate = arena.gt(sum_field, ten);
    let arena = Arc::new(arena);

    Declaration::sequence(vec![
        Declaration::new("source", basic.source_options(false)),
        Declaration::new(
            "filter",
            FilterNodeOptions::new(Arc::clone(&arena), first_predicate),
        ),
        Declaration::new(
            "project",
            ProjectNodeOptions::new(Arc::clone(&arena), vec![bool_field, product]),
        ),
        Declaration::new(
            "aggregate",
            AggregateNodeOptions::new(vec![
                AggregateSpec::new("hash_sum", "multiply(i32, 2)", "sum(multiply(i32, 2))"),
                AggregateSpec::new("hash_count", "multiply(i32, 2)", "count(multiply(i32, 2))")
                    .with_options(AggOptions::Count {
                        mode: CountMode::NonNull,
                    }),
            ])
            .with_keys(vec!["bool".to_string()]),
        ),
        Declaration::new(
            "filter",
            FilterNodeOptions::new(Arc::clone(&arena), second_predicate),
        ),
        Declaration::new(
            "order_by_sink",
            OrderBySinkNodeOptions::new(
                SortOptions::new(vec![SortKey::asc("sum(multiply(i32, 2))")]),
                handle,
            ),
        ),
    ])
    .add_to_plan(&plan)
    .expect("plan built");

    assert_eq!(
        plan.to_string(),
        "ExecPlan with 6 nodes:
SourceNode{\"source\", outputs=[\"filter\"]}
FilterNode{\"filter\", inputs=[target: \"source\"], outputs=[\"project\"], filter=(i32 >= 0)}
ProjectNode{\"project\", inputs=[target: \"filter\"], outputs=[\"aggregate\"], projection=[bool, multiply(i32, 2)]}
GroupByNode{\"aggregate\", inputs=[groupby: \"project\"], outputs=[\"filter\"], keys=[\"bool\"], aggregates=[
\thash_sum(multiply(i32, 2)),
\thash_count(multiply(i32, 2), {mode=NON_NULL}),
]}
FilterNode{\"filter\", inputs=[target: \"aggregate\"], outputs=[\"order_by_sink\"], filter=(sum(multiply(i32, 2)) > 10)}
OrderBySinkNode{\"order_by_sink\", inputs=[collected: \"filter\"], by={sort_keys=[sum(multiply(i32, 2)) ASC], null_placement=AtEnd}}
"
    );
}

#[test]
fn union_pipeline_to_string() {
    let basic = basic_batches();
    let handle = SinkHandle::new();
    let plan = ExecPlan::make_default();

    let union = Declaration::new("union", UnionNodeOptions::default()).with_inputs(vec![
        Declaration::new("source", basic.source_options(false)).with_label("lhs"),
        Declaration::new("source", basic.source_options(false)).with_label("rhs"),
    ]);
    Declaration::sequence(vec![
        union,
        Declaration::new(
            "aggregate",
            AggregateNodeOptions::new(vec![AggregateSpec::new("count", "i32", "count(i32)")
                .with_options(AggOptions::Count {
                    mode: CountMode::NonNull,
                })]),
        ),
        Declaration::new("sink", SinkNodeOptions::new(handle)),
    ])
    .add_to_plan(&plan)
    .expect("plan built");

    assert_eq!(
        plan.to_string(),
        "ExecPlan with 5 nodes:
SourceNode{\"lhs\", outputs=[\"union\"]}
SourceNode{\"rhs\", outputs=[\"union\"]}
UnionNode{\"union\", inputs=[input_0_label: \"lhs\", input_1_label: \"rhs\"], outputs=[\"aggregate\"]}
ScalarAggregateNode{\"aggregate\", inputs=[target: \"union\"], outputs=[\"sink\"], aggregates=[
\tcount(i32, {mode=NON_NULL}),
]}
SinkNode{\"sink\", inputs=[collected: \"aggregate\"]}
"
    );
}
