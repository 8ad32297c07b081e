// Copyright 2025-2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # ridge
//!
//! A compiler middle-end built around a **regionalized value-state dependence
//! graph** (RVSDG): a demand-driven, hierarchical SSA-like intermediate
//! representation where computation is a data-flow graph with explicit
//! structured control constructs. `ridge` ingests an LLVM-like module,
//! constructs the graph, runs graph-rewriting optimizations (including a
//! whole-program points-to analysis with a memory-state encoder), and lowers
//! back to the LLVM-like form for code generation.
//!
//! # Architecture
//!
//! - **Type layer** ([`crate::types`]): structural value and state types
//! - **Graph layer** ([`crate::rvsdg`]): regions, nodes, ports, users,
//!   ownership; γ/θ/λ/δ/φ structural nodes; textual dumps
//! - **Normalization** ([`crate::normalize`]): per-operation normal forms
//!   driven to fixed point
//! - **IR bridges** ([`crate::ir`], [`crate::bridge`]): CFGs of three-address
//!   code, structural analysis, construction and destructuring
//! - **Alias layer** ([`crate::alias`]): points-to graph and memory-state
//!   encoding
//! - **Passes** ([`crate::pass`]): the pass trait, module wrapper, event log
//!
//! # Usage Examples
//!
//! ## Normalizing a graph
//!
//! ```rust
//! use ridge::rvsdg::{simple, BitBinaryKind, Graph};
//! use ridge::types::Type;
//!
//! let mut graph = Graph::new();
//! let root = graph.root();
//! let x = graph.add_import(Type::Bit(32), "x");
//! let zero = simple::bit_constant(&mut graph, root, 32, 0)?;
//! // x + 0 reduces to x before any node is created.
//! let sum = simple::bit_binary(&mut graph, root, BitBinaryKind::Add, 32, x, zero)?;
//! assert_eq!(sum, x);
//! # Ok::<(), ridge::Error>(())
//! ```
//!
//! ## Converting a module
//!
//! ```rust,ignore
//! use ridge::bridge;
//! use ridge::pass::{run_passes, NormalizePass};
//! use ridge::alias::MemoryStateEncoderPass;
//!
//! let mut module = bridge::construct(&ir_module)?;
//! run_passes(&mut module, &[&NormalizePass::new(), &MemoryStateEncoderPass::new()])?;
//! let lowered = bridge::destruct(&module)?;
//! ```
//!
//! The core is single-threaded and owns all of its memory: dropping a
//! [`rvsdg::Graph`] releases every node and region transitively, and all
//! registries (normal forms included) are per-graph, never process-global.

#[macro_use]
pub(crate) mod error;

pub mod alias;
pub mod bridge;
pub mod ir;
pub mod normalize;
pub mod pass;
pub mod prelude;
pub mod rvsdg;
pub mod types;

/// Convenience alias for `std::result::Result` with this library's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;
