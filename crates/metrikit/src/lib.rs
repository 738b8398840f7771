//! Parallel metric-driven adaptation of unstructured tetrahedral meshes.
//!
//! Given a mixed-element volume mesh and a symmetric positive-definite
//! metric tensor per vertex, the adaptation loop drives every edge toward
//! unit length under the metric with four local operators (collapse,
//! split, swap, smooth), coordinated across ranks by ghost exchange,
//! geometric partitioning and migration.

mod adapt;
mod adjacency;
mod cad;
mod cell;
mod collapse;
mod comm;
mod edge;
mod error;
mod gather;
mod geometry;
mod grid;
pub mod io;
mod measure;
mod metric;
mod migrate;
mod node;
mod partition;
mod shard;
mod smooth;
mod sort;
mod split;
mod swap;

pub mod fixtures;

pub use crate::adapt::{AdaptDriver, AdaptParams, AdaptReport, PassCounts, SweepCounts};
pub use crate::adjacency::Adjacency;
pub use crate::cad::{GeomClass, GeomEntity, Projection};
pub use crate::cell::{CellKind, CellRow, CellTable};
pub use crate::collapse::collapse_pass;
pub use crate::comm::{Comm, Payload, Stopwatch, ThreadComm, Word};
pub use crate::edge::EdgeIndex;
pub use crate::error::{Error, Result};
pub use crate::gather::{GatheredMesh, gather_mesh, gather_metric, scatter_mesh};
pub use crate::grid::Grid;
pub use crate::measure::MetricMeasure;
pub use crate::metric::SymTensor;
pub use crate::migrate::migrate_to_balance;
pub use crate::node::{Global, Node, NodeTable, QualityMethod, RatioMethod};
pub use crate::partition::rcb_parts;
pub use crate::shard::shard_to_simplices;
pub use crate::smooth::smooth_pass;
pub use crate::split::split_pass;
pub use crate::swap::swap_pass;
