use super::*;
use crate::setup::{CoordinateSetup, MapSource, SetSetup, ShapeDim, VariableSetup};

fn labels(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn simple_set(items: &[&str]) -> SetSetup {
    SetSetup {
        items: labels(items),
        ..Default::default()
    }
}

fn table(
    kind: TableType,
    coordinates: &[&str],
    variables: &[(&str, BTreeMap<String, CoordinateSetup>)],
) -> TableSetup {
    TableSetup {
        description: None,
        table_type: kind,
        integer: false,
        coordinates: labels(coordinates),
        variables_info: variables
            .iter()
            .map(|(symbol, coords)| {
                (
                    symbol.to_string(),
                    VariableSetup {
                        coordinates: coords.clone(),
                        ..Default::default()
                    },
                )
            })
            .collect(),
    }
}

fn rows_decl(key: &str) -> BTreeMap<String, CoordinateSetup> {
    BTreeMap::from([(
        key.to_string(),
        CoordinateSetup {
            dim: Some(ShapeDim::Rows),
            filters: BTreeMap::new(),
        },
    )])
}

fn expect_settings_error(source: &MapSource, fragments: &[&str]) {
    match Index::build(source) {
        Err(crate::error::Error::Settings(report)) => {
            let text = report.to_string();
            for fragment in fragments {
                assert!(
                    text.contains(fragment),
                    "report should mention '{}', got:\n{}",
                    fragment,
                    text
                );
            }
        }
        other => panic!("expected aggregated settings error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn builds_a_minimal_catalog() {
    let source = MapSource::new()
        .with_set("r", simple_set(&["r1", "r2"]))
        .with_table(
            "demand",
            table(
                TableType::Single(VarKind::Exogenous),
                &["r"],
                &[("d", rows_decl("r"))],
            ),
        );

    let index = Index::build(&source).unwrap();
    let (_, set) = index.set_by_key("R").unwrap();
    assert_eq!(set.items, labels(&["r1", "r2"]));

    let (_, variable) = index.variable_by_symbol("d").unwrap();
    assert_eq!(variable.shape_size(), (2, 1));
    assert_eq!(index.scenarios().len(), 1);
}

#[test]
fn copy_from_clones_items_and_filters() {
    let source = MapSource::new()
        .with_set(
            "base",
            SetSetup {
                items: labels(&["a", "b"]),
                filters: BTreeMap::from([("good".to_string(), labels(&["a"]))]),
                ..Default::default()
            },
        )
        .with_set(
            "mirror",
            SetSetup {
                copy_from: Some("base".to_string()),
                ..Default::default()
            },
        );

    let index = Index::build(&source).unwrap();
    let (_, mirror) = index.set_by_key("mirror").unwrap();
    assert_eq!(mirror.items, labels(&["a", "b"]));
    assert_eq!(mirror.filters.get("good"), Some(&labels(&["a"])));
}

#[test]
fn copy_from_cycle_is_rejected_with_aggregated_report() {
    let source = MapSource::new()
        .with_set(
            "a",
            SetSetup {
                copy_from: Some("b".to_string()),
                ..Default::default()
            },
        )
        .with_set(
            "b",
            SetSetup {
                copy_from: Some("a".to_string()),
                ..Default::default()
            },
        );

    expect_settings_error(&source, &["a.copy_from", "b.copy_from", "cycle"]);
}

#[test]
fn validation_aggregates_every_finding() {
    // three independent mistakes must all surface at once
    let source = MapSource::new()
        .with_set(
            "r",
            SetSetup {
                items: labels(&["r1", "r1"]),
                filters: BTreeMap::from([("f".to_string(), labels(&["zzz"]))]),
                ..Default::default()
            },
        )
        .with_table(
            "t",
            table(
                TableType::Single(VarKind::Exogenous),
                &["r", "ghost"],
                &[("v", rows_decl("r"))],
            ),
        );

    expect_settings_error(
        &source,
        &["duplicate item", "not an item of the set", "not a registered set"],
    );
}

#[test]
fn endogenous_tables_must_carry_inter_problem_sets() {
    let source = MapSource::new()
        .with_set(
            "s",
            SetSetup {
                items: labels(&["s1", "s2"]),
                split_problem: true,
                ..Default::default()
            },
        )
        .with_set("r", simple_set(&["r1"]))
        .with_table(
            "x",
            table(
                TableType::Single(VarKind::Endogenous),
                &["r"],
                &[("x", rows_decl("r"))],
            ),
        );

    expect_settings_error(&source, &["x.coordinates", "missing inter-problem sets"]);
}

#[test]
fn integer_exogenous_tables_are_rejected() {
    let mut bad = table(
        TableType::Single(VarKind::Exogenous),
        &["r"],
        &[("v", rows_decl("r"))],
    );
    bad.integer = true;

    let source = MapSource::new()
        .with_set("r", simple_set(&["r1"]))
        .with_table("t", bad);

    expect_settings_error(&source, &["exogenous tables cannot be integer"]);
}

#[test]
fn type_split_keys_must_match_declared_problems() {
    let source = MapSource::new()
        .with_set("r", simple_set(&["r1"]))
        .with_table(
            "t",
            table(
                TableType::PerProblem(BTreeMap::from([
                    ("p1".to_string(), VarKind::Endogenous),
                    ("p2".to_string(), VarKind::Exogenous),
                ])),
                &["r"],
                &[("v", rows_decl("r"))],
            ),
        )
        .with_problem(
            "p1",
            crate::setup::ProblemSetup {
                description: None,
                objective: None,
                expressions: vec![],
            },
        );

    expect_settings_error(&source, &["t.type", "must exactly match declared problems"]);
}

#[test]
fn unknown_variable_filter_is_reported() {
    let coords = BTreeMap::from([(
        "r".to_string(),
        CoordinateSetup {
            dim: Some(ShapeDim::Rows),
            filters: BTreeMap::from([("nope".to_string(), labels(&["r1"]))]),
        },
    )]);
    let source = MapSource::new()
        .with_set("r", simple_set(&["r1", "r2"]))
        .with_table(
            "t",
            table(TableType::Single(VarKind::Exogenous), &["r"], &[("v", coords)]),
        );

    expect_settings_error(&source, &["filter 'nope' not defined on set 'r'"]);
}

#[test]
fn filter_pick_narrows_the_axis() {
    let coords = BTreeMap::from([(
        "r".to_string(),
        CoordinateSetup {
            dim: Some(ShapeDim::Rows),
            // picks only items outside the filter list
            filters: BTreeMap::from([("kind".to_string(), labels(&["r2"]))]),
        },
    )]);
    let source = MapSource::new()
        .with_set(
            "r",
            SetSetup {
                items: labels(&["r1", "r2"]),
                filters: BTreeMap::from([("kind".to_string(), labels(&["r1", "r2"]))]),
                ..Default::default()
            },
        )
        .with_table(
            "t",
            table(TableType::Single(VarKind::Exogenous), &["r"], &[("v", coords)]),
        );

    let index = Index::build(&source).unwrap();
    let (_, v) = index.variable_by_symbol("v").unwrap();
    assert_eq!(v.shape_size(), (1, 1));
}

#[test]
fn split_set_cannot_be_a_shape_dimension() {
    let source = MapSource::new()
        .with_set(
            "s",
            SetSetup {
                items: labels(&["s1"]),
                split_problem: true,
                ..Default::default()
            },
        )
        .with_table(
            "t",
            table(
                TableType::Single(VarKind::Endogenous),
                &["s"],
                &[("v", rows_decl("s"))],
            ),
        );

    expect_settings_error(&source, &["inter-problem sets cannot provide a shape dimension"]);
}

#[test]
fn scenario_table_spans_split_sets() {
    let source = MapSource::new()
        .with_set(
            "s",
            SetSetup {
                items: labels(&["s1", "s2"]),
                split_problem: true,
                ..Default::default()
            },
        )
        .with_set("r", simple_set(&["r1"]))
        .with_table(
            "x",
            table(
                TableType::Single(VarKind::Endogenous),
                &["s", "r"],
                &[("x", rows_decl("r"))],
            ),
        );

    let index = Index::build(&source).unwrap();
    assert_eq!(index.scenarios().len(), 2);

    let (_, x) = index.variable_by_symbol("x").unwrap();
    assert_eq!(x.inter.len(), 1);
    assert_eq!(x.inter[0].header, "s_Name");
    // hierarchy puts the inter dimension first
    let hierarchy: Vec<_> = x
        .sets_parsing_hierarchy()
        .iter()
        .map(|d| d.header.clone())
        .collect();
    assert_eq!(hierarchy, vec!["s_Name".to_string()]);
}

#[test]
fn table_schema_carries_id_and_foreign_keys() {
    let source = MapSource::new()
        .with_set("r", simple_set(&["r1"]))
        .with_table(
            "t",
            table(
                TableType::Single(VarKind::Exogenous),
                &["r"],
                &[("v", rows_decl("r"))],
            ),
        );

    let index = Index::build(&source).unwrap();
    let (_, t) = index.table_by_name("t").unwrap();

    assert_eq!(t.table_headers[0].header, "id");
    assert_eq!(t.table_headers[0].sql_type, "INTEGER PRIMARY KEY");
    assert_eq!(t.table_headers[1].header, "r_Name");
    assert_eq!(t.foreign_keys[0].references_table, "_set_R");
    assert_eq!(t.foreign_keys[0].references_column, "r_Name");
}
