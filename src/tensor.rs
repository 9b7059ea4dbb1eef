//! Backing numerical objects handed to the solver.
//!
//! Three kinds: *decision* tensors (values computed by the solver),
//! *parameters* (mutable containers assigned before each solve) and
//! *constants* (built once from a generator). All live in a [TensorArena]
//! and are addressed by [TensorId] handles; variable bindings reference
//! them through [TensorRef], either whole or as a row slice of a parent
//! decision tensor.

use ndarray::Array2;
use sprs::{CsMat, TriMat};

use crate::error::{Error, Result};

/// Handle into the tensor arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TensorId(pub usize);

impl std::fmt::Display for TensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameter storage. Matrices whose zero fraction reaches the configured
/// threshold are kept sparse.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Dense(Array2<f64>),
    Sparse { shape: (usize, usize), matrix: CsMat<f64> },
}

impl ParamValue {
    /// Wraps a dense matrix, switching to sparse storage when the zero
    /// ratio is at least `sparse_zero_ratio_threshold`.
    pub fn from_dense(value: Array2<f64>, sparse_zero_ratio_threshold: f64) -> Self {
        let total = value.len();
        if total == 0 {
            return ParamValue::Dense(value);
        }
        let zeros = value.iter().filter(|v| **v == 0.0).count();
        if (zeros as f64) / (total as f64) >= sparse_zero_ratio_threshold {
            let mut tri = TriMat::new(value.dim());
            for ((i, j), v) in value.indexed_iter() {
                if *v != 0.0 {
                    tri.add_triplet(i, j, *v);
                }
            }
            ParamValue::Sparse {
                shape: value.dim(),
                matrix: tri.to_csr(),
            }
        } else {
            ParamValue::Dense(value)
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        match self {
            ParamValue::Dense(m) => m.dim(),
            ParamValue::Sparse { shape, .. } => *shape,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self {
            ParamValue::Dense(m) => m[(row, col)],
            ParamValue::Sparse { matrix, .. } => matrix.get(row, col).copied().unwrap_or(0.0),
        }
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            ParamValue::Dense(m) => m.clone(),
            ParamValue::Sparse { shape, matrix } => {
                let mut out = Array2::zeros(*shape);
                for (v, (i, j)) in matrix.iter() {
                    out[(i, j)] = *v;
                }
                out
            }
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, ParamValue::Sparse { .. })
    }
}

/// One backing tensor.
#[derive(Debug, Clone)]
pub enum Tensor {
    /// Decision variable of known shape and domain; `value` appears after a
    /// successful solve.
    Decision {
        shape: (usize, usize),
        integer: bool,
        value: Option<Array2<f64>>,
    },
    /// Mutable container fed from the store before each solve.
    Parameter {
        shape: (usize, usize),
        value: Option<ParamValue>,
    },
    /// Immutable value derived from a generator at build time.
    Constant { value: Array2<f64> },
}

impl Tensor {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Tensor::Decision { shape, .. } => *shape,
            Tensor::Parameter { shape, .. } => *shape,
            Tensor::Constant { value } => value.dim(),
        }
    }

    /// Current numeric value, if any.
    pub fn value(&self) -> Option<Array2<f64>> {
        match self {
            Tensor::Decision { value, .. } => value.clone(),
            Tensor::Parameter { value, .. } => value.as_ref().map(ParamValue::to_dense),
            Tensor::Constant { value } => Some(value.clone()),
        }
    }
}

/// Arena owning every tensor of a materialized model.
#[derive(Debug, Default)]
pub struct TensorArena {
    tensors: Vec<Tensor>,
}

impl TensorArena {
    pub fn new() -> Self {
        TensorArena::default()
    }

    pub fn new_decision(&mut self, shape: (usize, usize), integer: bool) -> TensorId {
        self.tensors.push(Tensor::Decision {
            shape,
            integer,
            value: None,
        });
        TensorId(self.tensors.len() - 1)
    }

    pub fn new_parameter(&mut self, shape: (usize, usize)) -> TensorId {
        self.tensors.push(Tensor::Parameter { shape, value: None });
        TensorId(self.tensors.len() - 1)
    }

    pub fn new_constant(&mut self, value: Array2<f64>) -> TensorId {
        self.tensors.push(Tensor::Constant { value });
        TensorId(self.tensors.len() - 1)
    }

    pub fn get(&self, id: TensorId) -> &Tensor {
        &self.tensors[id.0]
    }

    /// Assigns a parameter value, shape-checked.
    pub fn assign_parameter(
        &mut self,
        id: TensorId,
        value: Array2<f64>,
        sparse_zero_ratio_threshold: f64,
    ) -> Result<()> {
        match &mut self.tensors[id.0] {
            Tensor::Parameter {
                shape,
                value: slot,
            } => {
                if value.dim() != *shape {
                    return Err(Error::Operational(format!(
                        "parameter shape mismatch: expected {:?}, got {:?}",
                        shape,
                        value.dim()
                    )));
                }
                *slot = Some(ParamValue::from_dense(value, sparse_zero_ratio_threshold));
                Ok(())
            }
            _ => Err(Error::Operational(format!(
                "tensor {} is not a parameter",
                id
            ))),
        }
    }

    /// Writes solver results into a decision tensor, shape-checked.
    pub fn assign_decision(&mut self, id: TensorId, value: Array2<f64>) -> Result<()> {
        match &mut self.tensors[id.0] {
            Tensor::Decision {
                shape,
                value: slot,
                ..
            } => {
                if value.dim() != *shape {
                    return Err(Error::Operational(format!(
                        "decision shape mismatch: expected {:?}, got {:?}",
                        shape,
                        value.dim()
                    )));
                }
                *slot = Some(value);
                Ok(())
            }
            _ => Err(Error::Operational(format!(
                "tensor {} is not a decision tensor",
                id
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// Reference from a variable binding to its backing tensor: either the
/// whole tensor, or a per-slot row selection out of a parent `(N, 1)`
/// decision tensor.
#[derive(Debug, Clone)]
pub enum TensorRef {
    Whole(TensorId),
    Slice {
        tensor: TensorId,
        /// Parent row index for every `(row, col)` slot of the view.
        index: Array2<usize>,
    },
}

impl TensorRef {
    pub fn tensor_id(&self) -> TensorId {
        match self {
            TensorRef::Whole(id) => *id,
            TensorRef::Slice { tensor, .. } => *tensor,
        }
    }

    pub fn shape(&self, arena: &TensorArena) -> (usize, usize) {
        match self {
            TensorRef::Whole(id) => arena.get(*id).shape(),
            TensorRef::Slice { index, .. } => index.dim(),
        }
    }

    /// Gathers the current numeric value of the view, if the backing tensor
    /// has one.
    pub fn value(&self, arena: &TensorArena) -> Option<Array2<f64>> {
        match self {
            TensorRef::Whole(id) => arena.get(*id).value(),
            TensorRef::Slice { tensor, index } => {
                let parent = arena.get(*tensor).value()?;
                let mut out = Array2::zeros(index.dim());
                for ((i, j), &row) in index.indexed_iter() {
                    out[(i, j)] = parent[(row, 0)];
                }
                Some(out)
            }
        }
    }
}
