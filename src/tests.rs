use std::fs;

use proptest::prelude::*;

use crate::branching::Branching;
use crate::environment::Environment;
use crate::error::ErrorKind;
use crate::hierarchy::Frame;
use crate::node::CaseKind;
use crate::solver::{ExpressionSolver, LogicalSolver};
use crate::tokenizer::{parse_ranges, tokenize, tokenize_array, Line, RawValue};
use crate::units::{SiUnits, UnitSystem};
use crate::value::{DType, Range, Scalar, Value};
use crate::{compile, json, CompileOptions, Dip, Node};

// ── Shared fixture runners ──────────────────────────────────────────

/// Embed fixture files at compile time.
const COMPILE_FIXTURES: &str = include_str!("../test-data/fixtures/compile.json");
const ERROR_FIXTURES: &str = include_str!("../test-data/fixtures/errors.json");

fn names(env: &Environment) -> Vec<String> {
    env.names().into_iter().map(str::to_string).collect()
}

fn rendered(env: &Environment, name: &str) -> String {
    env.value(name)
        .unwrap_or_else(|| panic!("node '{}' missing from {:?}", name, names(env)))
        .to_string()
}

fn line(text: &str) -> Line {
    Line {
        text: text.to_string(),
        source: "<test>".to_string(),
        number: 1,
    }
}

#[test]
fn test_fixture_compile() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(COMPILE_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let input = fixture["input"].as_str().unwrap();

        let env = match compile(input) {
            Ok(env) => env,
            Err(e) => panic!("Fixture '{}': unexpected error: {}", name, e),
        };

        let got: serde_json::Value = serde_json::from_str(&json::to_json(&env)).unwrap();
        assert_eq!(
            got, fixture["expected"],
            "Fixture '{}': output mismatch\n  Got:      {}\n  Expected: {}",
            name, got, fixture["expected"]
        );

        if let Some(order) = fixture.get("order") {
            let expected: Vec<String> = serde_json::from_value(order.clone()).unwrap();
            assert_eq!(names(&env), expected, "Fixture '{}': node order", name);
        }
    }
}

#[test]
fn test_fixture_errors() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(ERROR_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let input = fixture["input"].as_str().unwrap();
        let code = fixture["code"].as_str().unwrap();

        match compile(input) {
            Ok(env) => panic!(
                "Fixture '{}': expected {} but compiled {:?}",
                name,
                code,
                names(&env)
            ),
            Err(e) => {
                assert_eq!(e.code(), code, "Fixture '{}': wrong error: {}", name, e);
                assert!(
                    !e.context.is_empty(),
                    "Fixture '{}': error cites no line: {}",
                    name,
                    e
                );
            }
        }
    }
}

// ── Hierarchy ───────────────────────────────────────────────────────

#[test]
fn test_hierarchy_dotted_names() {
    let env = compile("foo int = 2\n  bar int = 3\n bim int = 4\nbom int = 5").unwrap();
    assert_eq!(names(&env), vec!["foo", "foo.bar", "foo.bim", "bom"]);
}

#[test]
fn test_groups_are_not_emitted() {
    let env = compile("outer\n  inner\n    leaf int = 1\n  other int = 2").unwrap();
    assert_eq!(names(&env), vec!["outer.inner.leaf", "outer.other"]);
}

#[test]
fn test_table_children_keep_table_scope() {
    let env = compile(
        "cfg
  t table = \"\"\"\n  x int\n  ---\n  1\n  \"\"\"\n    note str = 'n'
after int = 2",
    )
    .unwrap();
    assert_eq!(names(&env), vec!["cfg.t.x", "cfg.t.note", "after"]);
}

#[test]
fn test_hierarchy_path_skips_cases() {
    let mut hierarchy = crate::hierarchy::Hierarchy::new();
    hierarchy.push(0, Frame::Name("outer".to_string()));
    hierarchy.push(2, Frame::Case(0));
    hierarchy.push(4, Frame::Name("inner".to_string()));
    assert_eq!(hierarchy.path(6), vec!["outer", "inner"]);
    assert_eq!(hierarchy.path(4), vec!["outer"]);
    assert_eq!(hierarchy.qualify(0, "top"), "top");
}

// ── Branching ───────────────────────────────────────────────────────

#[test]
fn test_first_true_case_wins() {
    let env = compile(
        "@case true\nage int = 30\n@case true\nheight int = 180\n@else\nweight int = 80\n@end",
    )
    .unwrap();
    assert_eq!(names(&env), vec!["age"]);
}

#[test]
fn test_else_body_when_no_case_matches() {
    let env = compile("@case false\na int = 1\n@case false\nb int = 2\n@else\nc int = 3\nd int = 4\n@end")
        .unwrap();
    assert_eq!(names(&env), vec!["c", "d"]);
}

#[test]
fn test_false_outer_case_suppresses_nested_true_case() {
    let env = compile(
        "@case false\n  @case true\n    x int = 1\n  @end\n  y int = 2\n@end\nz int = 3",
    )
    .unwrap();
    assert_eq!(names(&env), vec!["z"]);
}

#[test]
fn test_branch_records_are_kept_out_of_names() {
    let env = compile("@case true\n  a int = 1\n@end").unwrap();
    let node = env.get("a").unwrap();
    assert_eq!(node.name, "a");
    assert_eq!(node.case, Some((0, 0)));
}

#[test]
fn test_case_expressions_are_not_evaluated_after_a_match() {
    // `{?missing}` would fail to resolve if the second case were evaluated.
    let env = compile("@case true\na int = 1\n@case (\"{?missing} > 1\")\nb int = 2\n@end").unwrap();
    assert_eq!(names(&env), vec!["a"]);
}

#[test]
fn test_branching_state_machine() {
    let mut branching = Branching::new();
    let at = line("@case");
    let never = |_: &str| -> crate::Result<bool> { panic!("literal cases skip the solver") };

    let first = branching
        .open_case(CaseKind::Case, Some("false"), vec![], &at, never)
        .unwrap();
    assert!(branching.is_false());

    branching
        .open_case(CaseKind::Case, Some("true"), vec![], &at, never)
        .unwrap();
    assert!(!branching.is_false());

    // Nested under a live case
    let nested_path = vec![Frame::Case(1)];
    branching
        .open_case(CaseKind::Case, Some("x"), nested_path.clone(), &at, |_| Ok(false))
        .unwrap();
    assert_eq!(branching.depth(), 2);
    assert!(branching.is_false());
    branching
        .open_case(CaseKind::Else, None, nested_path.clone(), &at, never)
        .unwrap();
    assert!(!branching.is_false());
    branching.close(&nested_path, &at).unwrap();

    branching.open_case(CaseKind::Else, None, vec![], &at, never).unwrap();
    assert!(branching.is_false());
    branching.close(&[], &at).unwrap();
    assert!(branching.finish().is_ok());

    assert_eq!(first, 0);
    assert_eq!(branching.branches().len(), 2);
    assert_eq!(branching.branches()[1].parent_case, Some(1));
    let values: Vec<bool> = branching.cases().iter().map(|c| c.value).collect();
    assert_eq!(values, vec![false, true, false, true, false]);
}

#[test]
fn test_end_must_match_the_open_branch() {
    let mut branching = Branching::new();
    let at = line("@end");
    let path = vec![Frame::Name("group".to_string())];
    branching
        .open_case(CaseKind::Case, Some("true"), path, &at, |_| Ok(true))
        .unwrap();
    let other = vec![Frame::Name("other".to_string())];
    let err = branching.close(&other, &at).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Syntax);
}

// ── Values ──────────────────────────────────────────────────────────

#[test]
fn test_array_formatting() {
    let env = compile("foo int[2,3] = [[1,2,3],[-4,-5,-6]]").unwrap();
    assert_eq!(rendered(&env, "foo"), "[[1, 2, 3], [-4, -5, -6]]");

    let env = compile("names str[2] = [a, 'b c']\nxs float[3] = [1, 0.25, 123456]").unwrap();
    assert_eq!(rendered(&env, "names"), "['a', 'b c']");
    assert_eq!(rendered(&env, "xs"), "[1.0, 0.25, 1.23456e+05]");
}

#[test]
fn test_slicing_references() {
    let env = compile(
        "snap int[2,3] = [[1,2,3],[4,5,6]]\nrow int[2] = {?snap}[1,1:2]\ncell int = {?snap}[1,0]",
    )
    .unwrap();
    assert_eq!(rendered(&env, "row"), "[5, 6]");
    assert_eq!(rendered(&env, "cell"), "4");
    assert_eq!(env.value("cell"), Some(&Value::from(4)));
}

#[test]
fn test_float_precision_option() {
    let mut dip = Dip::new();
    dip.from_string("x float = 3.14159265")
        .with_options(CompileOptions {
            float_precision: 3,
            ..CompileOptions::default()
        });
    let env = dip.compile().unwrap();
    assert_eq!(env.value("x").unwrap().to_string_with(Some(env.precision)), "3.14");
    assert_eq!(json::to_json(&env), r#"{"x":{"type":"float64","value":3.14}}"#);
}

#[test]
fn test_value_comparisons() {
    let a = Value::parse_scalar(DType::Int32, "3").unwrap();
    let b = Value::parse_scalar(DType::Int32, "5").unwrap();
    assert!(a.less_than(&b).unwrap());
    assert!(!a.equals(&b).unwrap());
    let c = Value::parse_scalar(DType::Float64, "3").unwrap();
    assert_eq!(a.equals(&c).unwrap_err().kind, ErrorKind::Type);
}

#[test]
fn test_integer_range_is_checked() {
    let err = compile("small int16 = 40000").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    let err = compile("pos uint = -1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

// ── Modification ────────────────────────────────────────────────────

#[test]
fn test_constant_cannot_be_reassigned() {
    let err = compile("a int = 1\n  !constant\na int = 2").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Constraint);
    assert_eq!(err.context.len(), 2, "cites both declarations: {}", err);

    let env = compile("a int = 1\na int = 2").unwrap();
    assert_eq!(env.value("a"), Some(&Value::from(2)));
    assert_eq!(names(&env), vec!["a"]);
}

#[test]
fn test_modification_inside_group() {
    let env = compile("cfg\n  depth int = 1\ncfg.depth = 7").unwrap();
    assert_eq!(env.value("cfg.depth"), Some(&Value::from(7)));
}

#[test]
fn test_modification_from_reference_converts_units() {
    let env = compile("a float = 2 km\nb float = 1 m\nb = {?a}").unwrap();
    assert_eq!(rendered(&env, "b"), "2000.0");
    assert_eq!(env.get("b").unwrap().units.as_deref(), Some("m"));
}

// ── Properties ──────────────────────────────────────────────────────

#[test]
fn test_options_error_lists_all_options() {
    let err = compile("bits int = 8\n  !options [16, 32, 64]").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Constraint);
    assert!(err.message.contains("[16, 32, 64]"), "{}", err.message);
}

#[test]
fn test_options_check_every_array_element() {
    assert!(compile("xs int[2] = [1, 2]\n  !options [1, 2, 3]").is_ok());
    let err = compile("xs int[2] = [1, 4]\n  !options [1, 2, 3]").unwrap_err();
    assert!(err.message.contains("Value 4"), "{}", err.message);
}

#[test]
fn test_property_error_cites_both_lines() {
    let err = compile("g\n  !tags [x]").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Scope);
    let codes: Vec<&str> = err.context.iter().map(|l| l.code.as_str()).collect();
    assert_eq!(codes, vec!["  !tags [x]", "g"]);
}

#[test]
fn test_condition_uses_own_value() {
    assert!(compile("a int = 7\n  !condition (\"{?} > 5 && {?} < 10\")").is_ok());
    let err = compile("a int = 2\n  !condition (\"{?} > 5\")").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Constraint);
}

#[test]
fn test_queries() {
    let env = compile(
        "a\n  x int = 1\n    !tags [\"geom\"]\n  y int = 2\nb int = 3\n  !tags [\"geom\", \"io\"]",
    )
    .unwrap();
    let matched: Vec<String> = env.query("a.*").unwrap().iter().map(|n| n.name.clone()).collect();
    assert_eq!(matched, vec!["a.x", "a.y"]);
    let tagged: Vec<String> = env.tagged("geom").iter().map(|n| n.name.clone()).collect();
    assert_eq!(tagged, vec!["a.x", "b"]);
    let data: Vec<(&str, String)> = env
        .data()
        .into_iter()
        .map(|(n, v)| (n, v.to_string()))
        .collect();
    assert_eq!(
        data,
        vec![("a.x", "1".to_string()), ("a.y", "2".to_string()), ("b", "3".to_string())]
    );
}

// ── Builder, functions and sources ──────────────────────────────────

#[test]
fn test_fragments_compile_as_one_document() {
    let env = Dip::new()
        .from_string("a int = 1")
        .from_string("b int = {?a}\na = 5")
        .compile()
        .unwrap();
    assert_eq!(names(&env), vec!["a", "b"]);
    assert_eq!(env.value("a"), Some(&Value::from(5)));
    assert_eq!(env.value("b"), Some(&Value::from(1)));
}

#[test]
fn test_value_functions() {
    let mut dip = Dip::new();
    dip.add_value_function("half", |_| Ok(Value::from(0.5)))
        .from_string("x float = (half)");
    let env = dip.compile().unwrap();
    assert_eq!(env.value("x"), Some(&Value::from(0.5)));

    let mut dip = Dip::new();
    dip.add_value_function("half", |_| Ok(Value::from(0.5)))
        .from_string("y int = (half)");
    let err = dip.compile().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("float64") && err.message.contains("int32"), "{}", err);
}

#[test]
fn test_table_functions() {
    let rows = |_: &Environment| -> crate::Result<Vec<Node>> {
        let ids = Value::parse_array(DType::Int32, &["1".to_string(), "2".to_string()], &[2])?;
        Ok(vec![
            Node::from_value("id", ids),
            Node::from_value("scale", Value::from(1.5)).with_units("m"),
        ])
    };
    let mut dip = Dip::new();
    dip.add_table_function("rows", rows)
        .from_string("t table = (rows)\ngroup\n  (rows)");
    let env = dip.compile().unwrap();
    assert_eq!(names(&env), vec!["t.id", "t.scale", "group.id", "group.scale"]);
    assert_eq!(rendered(&env, "t.id"), "[1, 2]");
    assert_eq!(env.get("group.scale").unwrap().units.as_deref(), Some("m"));
}

#[test]
fn test_nested_document_source() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("settings.dip"),
        "probe\n  speed float = 2 km/h\n  label str = 'north'",
    )
    .unwrap();
    let main = dir.path().join("main.dip");
    fs::write(
        &main,
        "$source cfg = settings.dip\nv float = {cfg?probe.speed} m/s\nimported {cfg?probe}",
    )
    .unwrap();

    let mut dip = Dip::new();
    dip.from_file(&main).unwrap();
    let env = dip.compile().unwrap();
    assert_eq!(names(&env), vec!["v", "imported.speed", "imported.label"]);
    assert_eq!(rendered(&env, "v"), "0.555556");
    assert_eq!(env.sources["cfg"].nodes.len(), 2);
}

#[test]
fn test_raw_text_source() {
    let dir = tempfile::tempdir().unwrap();
    let values = dir.path().join("values.txt");
    fs::write(&values, "[[1, 2], [3, 4]]\n").unwrap();
    let table = dir.path().join("table.txt");
    fs::write(&table, "x int\ny float\n---\n1 0.5\n2 1.5\n").unwrap();

    let mut dip = Dip::new();
    dip.add_source("raw", &values.display().to_string())
        .add_source("tab", &table.display().to_string())
        .from_string("m int[2,2] = {raw}\nfirst int[2] = {raw}[0,:]\nt table = {tab}");
    let env = dip.compile().unwrap();
    assert_eq!(rendered(&env, "m"), "[[1, 2], [3, 4]]");
    assert_eq!(rendered(&env, "first"), "[1, 2]");
    assert_eq!(rendered(&env, "t.y"), "[0.5, 1.5]");
    assert!(env.sources["raw"].nodes.is_empty());
}

#[test]
fn test_self_including_source_is_limited() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loop.dip");
    fs::write(&path, "$source me = loop.dip\na int = 1").unwrap();

    let mut dip = Dip::new();
    dip.from_file(&path).unwrap().with_options(CompileOptions {
        max_source_depth: 3,
        ..CompileOptions::default()
    });
    let err = dip.compile().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Reference);
    assert!(err.message.contains("nesting limit"), "{}", err);
}

#[test]
fn test_builder_unit_alias() {
    let mut dip = Dip::new();
    dip.add_unit("foot", "0.3048 m")
        .from_string("h float = 10 [foot]\nh_m float = {?h} m");
    let env = dip.compile().unwrap();
    assert_eq!(rendered(&env, "h_m"), "3.048");
    assert_eq!(env.units["foot"], "0.3048 m");
}

// ── Errors and rendering ────────────────────────────────────────────

#[test]
fn test_error_display_and_json() {
    let err = compile("a int = 1\nb int = {?nope}").unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("ReferenceError: "), "{}", text);
    assert!(text.contains("--> <string>:2"), "{}", text);

    let parsed: serde_json::Value = serde_json::from_str(&json::error_to_json(&err)).unwrap();
    assert_eq!(parsed["code"], "dip-reference-error");
    assert_eq!(parsed["context"][0]["line"], 2);
    assert_eq!(parsed["context"][0]["code"], "b int = {?nope}");
}

#[test]
fn test_pretty_json() {
    let env = compile("a int = 1").unwrap();
    assert_eq!(
        json::to_json_pretty(&env),
        "{\n  \"a\": {\n    \"type\": \"int32\",\n    \"value\": 1\n  }\n}"
    );
}

// ── Capabilities ────────────────────────────────────────────────────

#[test]
fn test_logical_solver() {
    let env = compile("n int = 4\nname str = 'abc'\nxs int[3] = [1, 2, 3]").unwrap();
    let solver = LogicalSolver;
    let cases = [
        ("1 < 2 and not false", true),
        ("{?n} == 4 && {?name} == 'abc'", true),
        ("{?n} != 4 || ({?n} >= 5)", false),
        ("!({?n} < 0)", true),
        ("{?xs}[1] == 2", true),
        ("{?xs}[0:1] == {?xs}[0:1]", true),
    ];
    for (expr, expected) in cases {
        assert_eq!(solver.evaluate(expr, &env).unwrap(), expected, "{}", expr);
    }
    assert_eq!(
        solver.evaluate("{?name} < 3", &env).unwrap_err().kind,
        ErrorKind::Type
    );
    assert_eq!(solver.evaluate("1 <", &env).unwrap_err().kind, ErrorKind::Syntax);
    assert_eq!(solver.evaluate("3", &env).unwrap_err().kind, ErrorKind::Type);
}

#[test]
fn test_si_units() {
    let units = SiUnits;
    let aliases = Default::default();
    let close = |a: f64, b: f64| (a - b).abs() <= 1e-9 * b.abs().max(1.0);

    assert!(close(units.convert(1.0, "km", "m", &aliases).unwrap(), 1000.0));
    assert!(close(units.convert(1.0, "kg*m/s2", "N", &aliases).unwrap(), 1.0));
    assert!(close(units.convert(3.0, "J/s", "W", &aliases).unwrap(), 3.0));
    assert!(close(units.convert(90.0, "deg", "rad", &aliases).unwrap(), std::f64::consts::FRAC_PI_2));
    assert!(close(units.convert(1.0, "h", "min", &aliases).unwrap(), 60.0));
    assert!(close(units.convert(1.0, "m^3", "L", &aliases).unwrap(), 1000.0));

    let err = units.convert(1.0, "m", "s", &aliases).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unit);
    assert!(units.validate("m/", &aliases).is_err());
    assert!(units.validate("furlong", &aliases).is_err());
    assert!(units.validate("[nope]", &aliases).is_err());

    let mut aliases = std::collections::BTreeMap::new();
    aliases.insert("loop".to_string(), "2 [loop]".to_string());
    assert_eq!(units.validate("[loop]", &aliases).unwrap_err().kind, ErrorKind::Unit);
}

// ── Tokenizer ───────────────────────────────────────────────────────

#[test]
fn test_tokenize_declaration_parts() {
    let draft = tokenize(&line("  mass float32[2,:4] = [1, 2] kg  # note")).unwrap();
    assert_eq!(draft.indent, 2);
    assert_eq!(draft.name.as_deref(), Some("mass"));
    let ty = draft.dtype.unwrap();
    assert_eq!((ty.base.as_str(), ty.width.as_deref()), ("float", Some("32")));
    assert_eq!(draft.dimension, Some(vec![Range::fixed(2), Range::bounded(0, 4)]));
    assert!(draft.defined);
    assert_eq!(
        draft.value,
        Some(RawValue::Array {
            items: vec!["1".into(), "2".into()],
            shape: vec![2]
        })
    );
    assert_eq!(draft.units.as_deref(), Some("kg"));
    assert_eq!(draft.comment.as_deref(), Some("note"));
}

#[test]
fn test_tokenize_values() {
    let value = |text: &str| tokenize(&line(text)).unwrap().value;
    assert_eq!(
        value("a int = {src?x.y}[0]"),
        Some(RawValue::Reference {
            request: "src?x.y".into(),
            slice: Some(vec![Range::fixed(0)])
        })
    );
    assert_eq!(value("a int = (count)"), Some(RawValue::Function("count".into())));
    assert_eq!(
        value("a bool = (\"{?b} == 1\")"),
        Some(RawValue::Expression("{?b} == 1".into()))
    );
    assert_eq!(value("a str = 'x # y'"), Some(RawValue::Literal("x # y".into())));
}

#[test]
fn test_ranges_and_arrays() {
    assert_eq!(
        parse_ranges("[2, 1:3, :]").unwrap(),
        vec![Range::fixed(2), Range::bounded(1, 3), Range::open(0)]
    );
    assert!(parse_ranges("[x]").is_err());

    let (items, shape) = tokenize_array("[[1, 2], [3, 4], [5, 6]]").unwrap();
    assert_eq!(shape, vec![3, 2]);
    assert_eq!(items.len(), 6);
    assert_eq!(tokenize_array("[[1], 2]").unwrap_err().kind, ErrorKind::Constraint);
}

#[test]
fn test_scalar_rendering() {
    let render = |s: Scalar| s.render(6, false);
    assert_eq!(render(Scalar::Float64(0.001)), "0.001");
    assert_eq!(render(Scalar::Float64(0.0001)), "1.0e-04");
    assert_eq!(render(Scalar::Float64(-2.5)), "-2.5");
    assert_eq!(render(Scalar::Float64(12345678.0)), "1.23457e+07");
    assert_eq!(render(Scalar::Str("a".into())), "a");
    assert_eq!(Scalar::Str("a".into()).render(6, true), "'a'");
}

// ── Properties ──────────────────────────────────────────────────────

fn flat_document() -> impl Strategy<Value = Vec<(String, i32)>> {
    prop::collection::vec(("[a-z][a-z0-9_]{0,6}", any::<i32>()), 1..12)
}

proptest! {
    #[test]
    fn prop_flat_documents_compile_in_source_order(entries in flat_document()) {
        let text: Vec<String> = entries
            .iter()
            .enumerate()
            .map(|(i, (name, v))| format!("n{}_{} int = {}", i, name, v))
            .collect();
        let text = text.join("\n");

        let first = compile(&text).unwrap();
        let second = compile(&text).unwrap();
        prop_assert_eq!(&first.nodes, &second.nodes);

        let expected: Vec<String> = entries
            .iter()
            .enumerate()
            .map(|(i, (name, _))| format!("n{}_{}", i, name))
            .collect();
        prop_assert_eq!(names(&first), expected);
        for (i, (name, v)) in entries.iter().enumerate() {
            let key = format!("n{}_{}", i, name);
            prop_assert_eq!(first.value(&key), Some(&Value::from(*v)));
        }
    }

    #[test]
    fn prop_nested_groups_prefix_names(depth in 1usize..6) {
        let mut text = String::new();
        for level in 0..depth {
            text.push_str(&format!("{}g{}\n", "  ".repeat(level), level));
        }
        text.push_str(&format!("{}leaf int = 1", "  ".repeat(depth)));

        let env = compile(&text).unwrap();
        let expected: Vec<String> = (0..depth).map(|l| format!("g{}", l)).chain(["leaf".to_string()]).collect();
        prop_assert_eq!(names(&env), vec![expected.join(".")]);
    }
}
