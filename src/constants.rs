//! Named constant generators.
//!
//! Constant variables carry a tag naming one of these generators; the
//! materializer invokes it with the variable's frozen shape to build the
//! tensor value. Vector-only generators demand a shape with one axis of
//! length 1.

use ndarray::Array2;

use crate::error::{Error, Result};

type Generator = fn((usize, usize)) -> Result<Array2<f64>>;

const REGISTRY: &[(&str, Generator)] = &[
    ("sum_vector", sum_vector),
    ("identity", identity),
    ("set_length", set_length),
    ("arange_0", arange_0),
    ("arange_1", arange_1),
    ("lower_triangular", lower_triangular),
];

pub fn is_registered(name: &str) -> bool {
    REGISTRY.iter().any(|(key, _)| *key == name)
}

pub fn registered_names() -> Vec<&'static str> {
    REGISTRY.iter().map(|(key, _)| *key).collect()
}

/// Runs the generator `name` on `shape`.
pub fn generate(name: &str, shape: (usize, usize)) -> Result<Array2<f64>> {
    let generator = REGISTRY
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, f)| *f)
        .ok_or_else(|| {
            Error::settings(
                "value",
                format!(
                    "constant generator '{}' not registered (available: {:?})",
                    name,
                    registered_names()
                ),
            )
        })?;
    generator(shape)
}

fn require_vector(name: &str, shape: (usize, usize)) -> Result<usize> {
    if shape.0 != 1 && shape.1 != 1 {
        return Err(Error::settings(
            "value",
            format!(
                "constant '{}' requires a vector shape, got {}x{}",
                name, shape.0, shape.1
            ),
        ));
    }
    Ok(shape.0.max(shape.1))
}

/// Vector of ones, for matrix summation.
fn sum_vector(shape: (usize, usize)) -> Result<Array2<f64>> {
    require_vector("sum_vector", shape)?;
    Ok(Array2::ones(shape))
}

/// Identity matrix sized on the longest axis. Accepts a vector shape
/// (the original form) or an already-square shape.
fn identity(shape: (usize, usize)) -> Result<Array2<f64>> {
    let n = if shape.0 == shape.1 {
        shape.0
    } else {
        require_vector("identity", shape)?
    };
    Ok(Array2::eye(n))
}

/// 1x1 matrix holding the length of the set behind the vector shape.
fn set_length(shape: (usize, usize)) -> Result<Array2<f64>> {
    let n = require_vector("set_length", shape)?;
    Ok(Array2::from_elem((1, 1), n as f64))
}

fn arange(shape: (usize, usize), start_from: usize) -> Result<Array2<f64>> {
    require_vector("arange", shape)?;
    let values: Vec<f64> = (0..shape.0 * shape.1)
        .map(|i| (start_from + i) as f64)
        .collect();
    Array2::from_shape_vec(shape, values)
        .map_err(|e| Error::settings("value", format!("arange shape error: {}", e)))
}

fn arange_0(shape: (usize, usize)) -> Result<Array2<f64>> {
    arange(shape, 0)
}

fn arange_1(shape: (usize, usize)) -> Result<Array2<f64>> {
    arange(shape, 1)
}

/// Square matrix with ones on and below the diagonal.
fn lower_triangular(shape: (usize, usize)) -> Result<Array2<f64>> {
    let n = if shape.0 == shape.1 {
        shape.0
    } else {
        require_vector("lower_triangular", shape)?
    };
    let mut out = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            out[(i, j)] = 1.0;
        }
    }
    Ok(out)
}
