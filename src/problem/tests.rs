use super::*;
use crate::expr::Expression;
use crate::index::Index;
use crate::setup::{
    CoordinateSetup, MapSource, ProblemSetup, SetSetup, ShapeDim, TableSetup, TableType,
    VariableSetup,
};
use crate::solver::{Solve, SolverOptions};

fn labels(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn shaped(entries: &[(&str, Option<ShapeDim>)]) -> BTreeMap<String, CoordinateSetup> {
    entries
        .iter()
        .map(|(key, dim)| {
            (
                key.to_string(),
                CoordinateSetup {
                    dim: *dim,
                    filters: BTreeMap::new(),
                },
            )
        })
        .collect()
}

/// Minimal LP catalog: a (exogenous 2x3), b (exogenous 2x1), x (endogenous
/// 1x3 vector), c (constant ones 1x3).
fn minimal_lp() -> MapSource {
    MapSource::new()
        .with_set(
            "r",
            SetSetup {
                items: labels(&["r1", "r2"]),
                ..Default::default()
            },
        )
        .with_set(
            "p",
            SetSetup {
                items: labels(&["p1", "p2", "p3"]),
                ..Default::default()
            },
        )
        .with_table(
            "a",
            TableSetup {
                description: None,
                table_type: TableType::Single(VarKind::Exogenous),
                integer: false,
                coordinates: labels(&["r", "p"]),
                variables_info: BTreeMap::from([(
                    "a".to_string(),
                    VariableSetup {
                        coordinates: shaped(&[
                            ("r", Some(ShapeDim::Rows)),
                            ("p", Some(ShapeDim::Cols)),
                        ]),
                        ..Default::default()
                    },
                )]),
            },
        )
        .with_table(
            "b",
            TableSetup {
                description: None,
                table_type: TableType::Single(VarKind::Exogenous),
                integer: false,
                coordinates: labels(&["r"]),
                variables_info: BTreeMap::from([(
                    "b".to_string(),
                    VariableSetup {
                        coordinates: shaped(&[("r", Some(ShapeDim::Rows))]),
                        ..Default::default()
                    },
                )]),
            },
        )
        .with_table(
            "x",
            TableSetup {
                description: None,
                table_type: TableType::Single(VarKind::Endogenous),
                integer: false,
                coordinates: labels(&["p"]),
                variables_info: BTreeMap::from([(
                    "x".to_string(),
                    VariableSetup {
                        coordinates: shaped(&[("p", Some(ShapeDim::Cols))]),
                        ..Default::default()
                    },
                )]),
            },
        )
        .with_table(
            "c",
            TableSetup {
                description: None,
                table_type: TableType::Single(VarKind::Constant),
                integer: false,
                coordinates: labels(&["p"]),
                variables_info: BTreeMap::from([(
                    "c".to_string(),
                    VariableSetup {
                        coordinates: shaped(&[("p", Some(ShapeDim::Cols))]),
                        value: Some("sum_vector".to_string()),
                        ..Default::default()
                    },
                )]),
            },
        )
        .with_problem(
            "lp",
            ProblemSetup {
                description: None,
                objective: Some((
                    ObjectiveSense::Maximize,
                    Expression::symbol("c").matmul(Expression::symbol("x").tran()),
                )),
                expressions: vec![
                    (Expression::symbol("a").matmul(Expression::symbol("x").tran())
                        - Expression::symbol("b"))
                    .leq(Expression::lit(0.0)),
                    Expression::symbol("x").geq(Expression::lit(0.0)),
                ],
            },
        )
}

fn assign_exogenous(index: &Index, materialized: &mut Materialized) {
    // a = [[1,2,3],[4,5,6]], b = [7, 15]
    for (symbol, value) in [
        (
            "a",
            ndarray::array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
        ),
        ("b", ndarray::array![[7.0], [15.0]]),
    ] {
        let (id, _) = index.variable_by_symbol(symbol).unwrap();
        let binding = materialized.bindings.get(&id).unwrap();
        let table = match binding {
            VariableBinding::Single(t) => t,
            VariableBinding::PerProblem(_) => panic!("single-type variable expected"),
        };
        let tensor = table.rows[0].tensor.tensor_id();
        materialized
            .arena
            .assign_parameter(tensor, value, 0.3)
            .unwrap();
    }
}

#[test]
fn grid_lengths_match_table_length() {
    let index = Index::build(&minimal_lp()).unwrap();
    let materialized = materialize(&index).unwrap();

    let (table_id, _) = index.table_by_name("x").unwrap();
    let grid = materialized.grids.get(&table_id).unwrap();
    assert_eq!(grid.table_length(), 3);

    match grid {
        TableGrid::Single(frame) => {
            let mut deduped = frame.clone();
            deduped.dedup_rows();
            assert_eq!(deduped.len(), frame.len());
        }
        TableGrid::PerScenario(_) => panic!("no inter-problem sets declared"),
    }
}

#[test]
fn binding_shapes_follow_declarations() {
    let index = Index::build(&minimal_lp()).unwrap();
    let materialized = materialize(&index).unwrap();

    let (a_id, a) = index.variable_by_symbol("a").unwrap();
    assert_eq!(a.shape_size(), (2, 3));

    let binding = materialized.bindings.get(&a_id).unwrap();
    let table = binding.table_for("lp").unwrap();
    // no intra/inter dimensions: exactly one binding row
    assert_eq!(table.rows.len(), 1);

    let filter = &table.rows[0].filter;
    assert_eq!(
        filter.get("r_Name"),
        Some(&FilterValue::Many(labels(&["r1", "r2"])))
    );
    assert_eq!(
        filter.get("p_Name"),
        Some(&FilterValue::Many(labels(&["p1", "p2", "p3"])))
    );
}

#[test]
fn endogenous_binding_slices_the_table_tensor() {
    let index = Index::build(&minimal_lp()).unwrap();
    let materialized = materialize(&index).unwrap();

    let (x_id, x) = index.variable_by_symbol("x").unwrap();
    assert_eq!(x.shape_size(), (1, 3));

    let binding = materialized.bindings.get(&x_id).unwrap();
    let table = binding.table_for("lp").unwrap();
    match &table.rows[0].tensor {
        TensorRef::Slice { index: slice, .. } => {
            assert_eq!(slice.dim(), (1, 3));
            // grid enumerates p1, p2, p3 in declaration order
            assert_eq!(slice[(0, 0)], 0);
            assert_eq!(slice[(0, 2)], 2);
        }
        TensorRef::Whole(_) => panic!("endogenous binding must slice the table tensor"),
    }
}

#[test]
fn constant_binding_generates_its_value() {
    let index = Index::build(&minimal_lp()).unwrap();
    let materialized = materialize(&index).unwrap();

    let (c_id, _) = index.variable_by_symbol("c").unwrap();
    let binding = materialized.bindings.get(&c_id).unwrap();
    let table = binding.table_for("lp").unwrap();
    let value = table.rows[0].tensor.value(&materialized.arena).unwrap();
    assert_eq!(value, ndarray::array![[1.0, 1.0, 1.0]]);
}

#[test]
fn lowered_instance_solves_to_the_lp_optimum() {
    let index = Index::build(&minimal_lp()).unwrap();
    let mut materialized = materialize(&index).unwrap();
    assign_exogenous(&index, &mut materialized);

    let scenario = ScenarioId(0);
    let setup = index.problem("lp").unwrap().clone();
    let (lowered, slots) =
        lower_instance(&index, &materialized, "lp", &setup, scenario).unwrap();

    assert_eq!(lowered.variables.len(), 3);
    // 2 rows of a @ tran(x) <= b, 3 elements of x >= 0
    assert_eq!(lowered.constraints.len(), 5);

    let outcome =
        crate::solver::good_lp::GoodSolver::new().solve(&lowered, &SolverOptions::default());
    assert!(outcome.status.is_optimal());

    write_back(&mut materialized.arena, &slots, &outcome.values).unwrap();

    let (x_id, _) = index.variable_by_symbol("x").unwrap();
    let binding = materialized.bindings.get(&x_id).unwrap();
    let x_value = binding.table_for("lp").unwrap().rows[0]
        .tensor
        .value(&materialized.arena)
        .unwrap();

    // maximize x1+x2+x3 s.t. x1+2x2+3x3 <= 7, 4x1+5x2+6x3 <= 15, x >= 0
    // optimum 15/4 at x = (3.75, 0, 0), second row of b saturated
    let total: f64 = x_value.iter().sum();
    assert!((total - 3.75).abs() < 1e-6);
    assert!((x_value[(0, 0)] - 3.75).abs() < 1e-6);
}

#[test]
fn missing_parameter_value_is_a_missing_data_error() {
    let index = Index::build(&minimal_lp()).unwrap();
    let materialized = materialize(&index).unwrap();

    let setup = index.problem("lp").unwrap().clone();
    let result = lower_instance(&index, &materialized, "lp", &setup, ScenarioId(0));
    assert!(matches!(result, Err(Error::MissingData(_))));
}

#[test]
fn pivot_reshapes_store_rows_in_declared_order() {
    let index = Index::build(&minimal_lp()).unwrap();
    let (_, a) = index.variable_by_symbol("a").unwrap();

    let row = |r: &str, p: &str, id: i64, value: f64| crate::store::StoreRow {
        id,
        coords: BTreeMap::from([
            ("r_Name".to_string(), r.to_string()),
            ("p_Name".to_string(), p.to_string()),
        ]),
        value: Some(value),
    };

    // shuffled input order; first-write-wins on the duplicate
    let rows = vec![
        row("r2", "p3", 6, 6.0),
        row("r1", "p1", 1, 1.0),
        row("r1", "p1", 7, 99.0),
        row("r1", "p2", 2, 2.0),
        row("r1", "p3", 3, 3.0),
        row("r2", "p1", 4, 4.0),
        row("r2", "p2", 5, 5.0),
    ];

    let matrix = pivot_rows(a, &rows, false).unwrap();
    assert_eq!(
        matrix,
        ndarray::array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]
    );
}

#[test]
fn pivot_missing_slot_without_blank_fill_fails() {
    let index = Index::build(&minimal_lp()).unwrap();
    let (_, b) = index.variable_by_symbol("b").unwrap();

    let rows = vec![crate::store::StoreRow {
        id: 1,
        coords: BTreeMap::from([("r_Name".to_string(), "r1".to_string())]),
        value: Some(7.0),
    }];

    assert!(matches!(
        pivot_rows(b, &rows, false),
        Err(Error::MissingData(_))
    ));

    let mut filled = b.clone();
    filled.blank_fill = Some(0.0);
    let matrix = pivot_rows(&filled, &rows, false).unwrap();
    assert_eq!(matrix, ndarray::array![[7.0], [0.0]]);
}

#[test]
fn scalar_variable_pivots_to_one_by_one() {
    let source = minimal_lp().with_table(
        "k",
        TableSetup {
            description: None,
            table_type: TableType::Single(VarKind::Exogenous),
            integer: false,
            coordinates: labels(&["r"]),
            variables_info: BTreeMap::from([(
                "k".to_string(),
                VariableSetup {
                    // no dims declared: scalar, r becomes intra
                    coordinates: shaped(&[("r", None)]),
                    ..Default::default()
                },
            )]),
        },
    );
    let index = Index::build(&source).unwrap();
    let (_, k) = index.variable_by_symbol("k").unwrap();
    assert_eq!(k.shape_size(), (1, 1));

    let rows = vec![crate::store::StoreRow {
        id: 1,
        coords: BTreeMap::from([("r_Name".to_string(), "r1".to_string())]),
        value: Some(42.0),
    }];
    let matrix = pivot_rows(k, &rows, false).unwrap();
    assert_eq!(matrix, ndarray::array![[42.0]]);
}
