//! End-to-end runs of multi-step pipelines.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use rowpipes_rs::condition::{Comparison, Condition};
use rowpipes_rs::steps::{
    CartesianJoin, CartesianJoinConfig, CollectedRows, Collector, DelimitedTextInput,
    DelimitedTextOutput,
    FieldValidation, FilterRows, FilterRowsConfig, MergeStreams, Normaliser, NormaliserConfig,
    Rule, RowsSource, Validator, ValidatorConfig,
};
use rowpipes_rs::{
    DataType, EngineConfig, ErrorHandling, Pipeline, PipelineError, Row, RowSchema, StepState,
    Value,
};

fn source(fields: &[(&str, DataType)], values: Vec<Vec<Value>>) -> RowsSource {
    let schema = Arc::new(RowSchema::of(fields).unwrap());
    RowsSource::from_values(schema, values).unwrap()
}

fn keys(n: i64) -> RowsSource {
    source(&[("k", DataType::Integer)], (1..=n).map(|i| vec![Value::Integer(i)]).collect())
}

fn letters(letters: &[&str]) -> RowsSource {
    source(
        &[("x", DataType::String)],
        letters.iter().map(|l| vec![Value::from(*l)]).collect(),
    )
}

fn numbers(values: &[f64]) -> RowsSource {
    source(
        &[("n", DataType::Number)],
        values.iter().map(|n| vec![Value::Number(*n)]).collect(),
    )
}

fn texts(rows: &[Row]) -> Vec<String> {
    rows.iter().map(Row::to_string).collect()
}

/// a × b (× c) into a collector.
fn join_pipeline(
    config: EngineConfig,
    join: CartesianJoinConfig,
    streams: Vec<(&str, RowsSource)>,
) -> (Pipeline, CollectedRows) {
    let collector = Collector::new();
    let handle = collector.handle();
    let mut pipeline = Pipeline::new().with_config(config);
    for (name, step) in streams {
        pipeline.add_step(name, step).add_hop(name, "join");
    }
    pipeline
        .add_step("join", CartesianJoin::new(join))
        .add_step("out", collector)
        .add_hop("join", "out");
    (pipeline, handle)
}

#[test]
fn test_join_scenario_exact_order() {
    let (pipeline, rows) = join_pipeline(
        EngineConfig::default(),
        CartesianJoinConfig::new("a"),
        vec![("a", keys(2)), ("b", letters(&["a", "b", "c"]))],
    );
    let result = pipeline.run().unwrap();
    assert!(result.is_success());
    assert_eq!(
        texts(&rows.rows()),
        vec!["(1, a)", "(1, b)", "(1, c)", "(2, a)", "(2, b)", "(2, c)"]
    );
    assert_eq!(result.step("join").unwrap().metrics.lines_written, 6);
}

#[test]
fn test_join_row_count_is_product() {
    let (pipeline, rows) = join_pipeline(
        EngineConfig::default(),
        CartesianJoinConfig::new("a"),
        vec![
            ("a", keys(4)),
            ("b", letters(&["a", "b", "c"])),
            ("c", source(&[("y", DataType::Integer)], (0..5).map(|i| vec![Value::Integer(i)]).collect())),
        ],
    );
    assert!(pipeline.run().unwrap().is_success());
    assert_eq!(rows.len(), 4 * 3 * 5);
}

#[test]
fn test_join_with_empty_stream_emits_nothing() {
    let (pipeline, rows) = join_pipeline(
        EngineConfig::default(),
        CartesianJoinConfig::new("a"),
        vec![("a", keys(3)), ("b", letters(&[]))],
    );
    let result = pipeline.run().unwrap();
    assert!(result.is_success());
    assert!(rows.is_empty());
    assert_eq!(result.step("join").unwrap().state, StepState::Done);
}

#[test]
fn test_join_spill_is_transparent() {
    let dir = tempfile::tempdir().unwrap();
    let run = |cache_size: usize| {
        let (pipeline, rows) = join_pipeline(
            EngineConfig::default().with_spill_dir(dir.path()),
            CartesianJoinConfig::new("a").with_cache_size(cache_size),
            vec![
                ("a", keys(3)),
                ("b", letters(&["a", "b", "c", "d"])),
                ("c", letters(&["p", "q"])),
                ("d", numbers(&[1.0715660391465826e-75, 0.1 + 0.2, 2.0 / 3.0])),
            ],
        );
        assert!(pipeline.run().unwrap().is_success());
        rows.rows()
    };
    let unbounded = run(usize::MAX);
    assert_eq!(unbounded.len(), 72);
    assert_eq!(run(0), unbounded);
    assert_eq!(run(1), unbounded);
    assert_eq!(run(3), unbounded);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_join_under_backpressure() {
    let (pipeline, rows) = join_pipeline(
        EngineConfig::default()
            .with_row_set_capacity(1)
            .with_poll_interval(Duration::from_millis(1)),
        CartesianJoinConfig::new("a").with_cache_size(2),
        vec![("a", keys(20)), ("b", keys(10))],
    );
    assert!(pipeline.run().unwrap().is_success());
    assert_eq!(rows.len(), 200);
}

#[test]
fn test_error_rows_routed_to_error_hop() {
    let good = Collector::new();
    let bad = Collector::new();
    let (good_rows, bad_rows) = (good.handle(), bad.handle());
    let validator = Validator::new(ValidatorConfig::default().validate(
        FieldValidation::new("k").rule(Rule::Max(3.0)).code("K_MAX"),
    ));

    let mut pipeline = Pipeline::new();
    pipeline
        .add_step("src", keys(5))
        .add_step("check", validator)
        .add_step("good", good)
        .add_step("bad", bad)
        .add_hop("src", "check")
        .add_hop("check", "good")
        .add_error_hop("check", "bad", ErrorHandling::default());
    let result = pipeline.run().unwrap();

    assert!(result.is_success());
    assert_eq!(good_rows.len(), 3);
    let rejected = bad_rows.rows();
    assert_eq!(rejected.len(), 2);
    assert_eq!(
        rejected[0].schema().names(),
        vec!["k", "error_count", "error_descriptions", "error_fields", "error_codes"]
    );
    assert_eq!(rejected[0].get_by_name("error_codes"), Some(&Value::from("K_MAX")));
    assert_eq!(result.step("check").unwrap().metrics.lines_rejected, 2);
}

#[test]
fn test_row_error_without_error_hop_stops_pipeline() {
    let out = Collector::new();
    let validator = Validator::new(
        ValidatorConfig::default().validate(FieldValidation::new("k").rule(Rule::Max(3.0))),
    );
    let mut pipeline = Pipeline::new().with_config(EngineConfig::default().with_row_set_capacity(1));
    pipeline
        .add_step("src", keys(10_000))
        .add_step("check", validator)
        .add_step("out", out)
        .add_hop("src", "check")
        .add_hop("check", "out");
    let result = pipeline.run().unwrap();

    assert!(!result.is_success());
    assert_eq!(result.errors(), 1);
    assert_eq!(result.step("check").unwrap().state, StepState::Error);
    assert!(result.step("src").unwrap().metrics.lines_written < 10_000);
}

#[test]
fn test_rejection_limit_is_fatal() {
    let validator = Validator::new(
        ValidatorConfig::default().validate(FieldValidation::new("k").rule(Rule::Max(0.0))),
    );
    let mut pipeline = Pipeline::new();
    pipeline
        .add_step("src", keys(10))
        .add_step("check", validator)
        .add_step("bad", Collector::new())
        .add_hop("src", "check")
        .add_error_hop("check", "bad", ErrorHandling::default().with_max_errors(3));
    let result = pipeline.run().unwrap();
    assert_eq!(result.errors(), 1);
    assert!(result.step("check").unwrap().error.is_some());
}

#[test]
fn test_merge_streams_widens_conflicts() {
    let collector = Collector::new();
    let rows = collector.handle();
    let mut pipeline = Pipeline::new();
    pipeline
        .add_step("ints", keys(2))
        .add_step(
            "strings",
            source(&[("k", DataType::String), ("note", DataType::String)], vec![vec![
                Value::from("z"),
                Value::from("hi"),
            ]]),
        )
        .add_step("merge", MergeStreams::new())
        .add_step("out", collector)
        .add_hop("ints", "merge")
        .add_hop("strings", "merge")
        .add_hop("merge", "out");
    assert!(pipeline.run().unwrap().is_success());

    let mut got = texts(&rows.rows());
    got.sort();
    assert_eq!(got, vec!["(1, )", "(2, )", "(z, hi)"]);
    let schema = rows.rows()[0].schema().clone();
    assert_eq!(schema.names(), vec!["k", "note"]);
    assert_eq!(schema.field(0).unwrap().data_type, DataType::String);
}

#[test]
fn test_filter_then_normalise() {
    let collector = Collector::new();
    let rows = collector.handle();
    let sales = source(
        &[
            ("region", DataType::String),
            ("q1", DataType::Integer),
            ("q2", DataType::Integer),
        ],
        vec![
            vec![Value::from("north"), Value::Integer(10), Value::Integer(20)],
            vec![Value::from("south"), Value::Integer(30), Value::Integer(40)],
        ],
    );
    let filter = FilterRows::new(FilterRowsConfig::new(Condition::constant(
        "region",
        Comparison::Equal,
        "north",
    )));
    let normaliser = Normaliser::new(
        NormaliserConfig::new("quarter")
            .map("q1", "Q1", "sales")
            .map("q2", "Q2", "sales"),
    );

    let mut pipeline = Pipeline::new();
    pipeline
        .add_step("sales", sales)
        .add_step("north", filter)
        .add_step("normalise", normaliser)
        .add_step("out", collector)
        .add_hop("sales", "north")
        .add_hop("north", "normalise")
        .add_hop("normalise", "out");
    assert!(pipeline.run().unwrap().is_success());
    assert_eq!(texts(&rows.rows()), vec!["(north, Q1, 10)", "(north, Q2, 20)"]);
}

#[test]
fn test_init_failure_aborts_before_rows_move() {
    let collector = Collector::new();
    let rows = collector.handle();
    let mut pipeline = Pipeline::new();
    pipeline
        .add_step("src", keys(3))
        .add_step(
            "filter",
            FilterRows::new(FilterRowsConfig::new(Condition::is_null("missing"))),
        )
        .add_step("out", collector)
        .add_hop("src", "filter")
        .add_hop("filter", "out");
    let err = pipeline.run().unwrap_err();
    assert!(matches!(err, PipelineError::Config { .. }));
    assert!(rows.is_empty());
}

#[test]
fn test_copy_rows_to_every_output() {
    let (left, right) = (Collector::new(), Collector::new());
    let (left_rows, right_rows) = (left.handle(), right.handle());
    let mut pipeline = Pipeline::new();
    pipeline
        .add_step("src", keys(4))
        .add_step("left", left)
        .add_step("right", right)
        .add_hop("src", "left")
        .add_hop("src", "right")
        .set_copy_rows("src", true);
    assert!(pipeline.run().unwrap().is_success());
    assert_eq!(left_rows.len(), 4);
    assert_eq!(right_rows.len(), 4);
}

#[test]
fn test_delimited_files_joined() {
    let dir = tempfile::tempdir().unwrap();
    let main = dir.path().join("main.txt");
    let other = dir.path().join("other.txt");
    fs::write(&main, "id:Integer;name\n1;ann\n2;bob\n").unwrap();
    fs::write(&other, "day:Date\n2024-01-01 00:00:00\n2024-01-02 00:00:00\n").unwrap();

    let collector = Collector::new();
    let rows = collector.handle();
    let mut pipeline = Pipeline::new().with_config(EngineConfig::default().with_spill_dir(dir.path()));
    pipeline
        .add_step("main", DelimitedTextInput::new(&main, ';'))
        .add_step("days", DelimitedTextInput::new(&other, ';'))
        .add_step(
            "join",
            CartesianJoin::new(CartesianJoinConfig::new("main").with_cache_size(0)),
        )
        .add_step("out", collector)
        .add_hop("days", "join")
        .add_hop("main", "join")
        .add_hop("join", "out");
    assert!(pipeline.run().unwrap().is_success());
    assert_eq!(
        texts(&rows.rows()),
        vec![
            "(1, ann, 2024-01-01 00:00:00)",
            "(1, ann, 2024-01-02 00:00:00)",
            "(2, bob, 2024-01-01 00:00:00)",
            "(2, bob, 2024-01-02 00:00:00)",
        ]
    );
}

#[test]
fn test_join_streams_to_delimited_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("joined.txt");
    let mut pipeline = Pipeline::new().with_config(
        EngineConfig::default()
            .with_spill_dir(dir.path())
            .with_row_set_capacity(2),
    );
    pipeline
        .add_step("a", keys(2))
        .add_step("b", letters(&["a", "b"]))
        .add_step("join", CartesianJoin::new(CartesianJoinConfig::new("a")))
        .add_step("file", DelimitedTextOutput::create(&path, ',').unwrap())
        .add_hop("a", "join")
        .add_hop("b", "join")
        .add_hop("join", "file");
    let result = pipeline.run().unwrap();
    assert!(result.is_success());
    assert_eq!(result.step("file").unwrap().metrics.lines_read, 4);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "k:Integer,x:String\n1,a\n1,b\n2,a\n2,b\n"
    );
}
