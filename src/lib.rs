//! CVXlab: declarative convex optimization models over a relational store.
//!
//! A model is described as *sets* (index domains), *data tables*
//! (relational tensors keyed by coordinate tuples), *variables* (typed
//! views over tables) and symbolic *problems* (objective and constraint
//! expressions). The engine materializes this description into concrete
//! subproblems - one per combination of the inter-problem sets - feeds
//! exogenous data from a SQLite store, solves them, and writes endogenous
//! results back. Coupled subproblems iterate to a fixed point with a block
//! Gauss-Seidel scheme whose on-disk state is crash-safe: the store is
//! backed up before the loop and restored on every exit path.
//!
//! The expression parser, the spreadsheet/YAML loaders and the convex
//! solver itself live outside this crate; their contracts are the
//! [Expression](expr::Expression) AST, the [SetupSource](setup::SetupSource)
//! trait and the [Solve](solver::Solve) trait.
//!
//! The normal workflow starts with a [Model](model::Model):
//!
//! ```no_run
//! # async fn demo() -> cvxlab::error::Result<()> {
//! use cvxlab::config::Config;
//! use cvxlab::model::{Model, RunOptions};
//! use cvxlab::setup::MapSource;
//!
//! let source = MapSource::new(); // sets, tables, problems
//! let mut model = Model::new(
//!     Config::default(),
//!     &source,
//!     std::path::Path::new("model.db"),
//! )?;
//! model.load_model_coordinates()?;
//! model.initialize_blank_data_structure().await?;
//! model.initialize_problems(false, false).await?;
//! model.run(RunOptions::default()).await?;
//! model.load_results_to_store(None).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod coords;
pub mod core;
pub mod error;
pub mod expr;
pub mod index;
pub mod linexpr;
pub mod model;
pub mod problem;
pub mod setup;
pub mod solver;
pub mod store;
pub mod tensor;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{Model, RunOptions};
