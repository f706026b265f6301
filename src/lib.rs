//! # fa-rs: shape analysis with forest automata
//!
//! **`fa-rs`** verifies heap-manipulating programs (no invalid dereference, no
//! invalid release, no garbage) by abstract symbolic execution. Sets of heaps
//! are represented by **forest automata**: tuples of tree automata whose
//! leaves may refer to each other's roots, compressed with reusable
//! parametric sub-shapes called **boxes**.
//!
//! ## Architecture
//!
//! - **Manager-centric**: every node label, data value and box is hash-consed
//!   in a single [`Registry`][crate::registry::Registry], and all operations
//!   go through it. Handles such as [`LabelId`][crate::types::LabelId] are
//!   plain integers, so automata are cheap to clone and compare.
//! - **Canonical forms**: configurations are normalized after every step, so
//!   that inclusion between sets of heaps reduces to tree-automata language
//!   inclusion.
//! - **Boxes are learned on demand**: a repeated doubly-linked shape becomes
//!   a new box, and the analysis restarts with the larger box set.
//!
//! ## Basic Usage
//!
//! ```rust
//! use fa_rs::config::EngineConfig;
//! use fa_rs::engine::Engine;
//! use fa_rs::program::{FncBuilder, Insn, Operand, ProgramBuilder};
//!
//! // struct node { struct node* next; };
//! let mut pb = ProgramBuilder::new();
//! let node = pb.declare_struct("node");
//! let ptr = pb.pointer(node);
//! pb.define_struct(node, 8, &[("next", 0, ptr)]);
//!
//! // x = malloc(sizeof(struct node)); free(x);
//! let mut fb = FncBuilder::new("main");
//! let x = fb.var("x", ptr);
//! let entry = fb.block("entry");
//! fb.push(entry, Insn::call(Operand::var(x, ptr), "malloc", vec![Operand::int(8, pb.int())]));
//! fb.push(entry, Insn::assign(Operand::var(x, ptr), Operand::var(x, ptr)));
//! fb.push(entry, Insn::call(Operand::void(), "free", vec![Operand::var(x, ptr)]));
//! fb.push(entry, Insn::ret());
//! pb.function(fb.build());
//! let program = pb.build();
//!
//! let mut engine = Engine::new(&program, EngineConfig::default()).unwrap();
//! let report = engine.run("main").unwrap();
//! assert!(report.fixpoints.is_empty());
//! ```
//!
//! ## Core Components
//!
//! - **[`registry`]**: canonical registry and box database.
//! - **[`ta`]**: bottom-up tree automata.
//! - **[`fa`]**: forest automata, with [`normalize`], [`fold`] and abstraction.
//! - **[`fixpoint`]** and **[`trace`]**: per-loop accumulators and the derivation history.
//! - **[`engine`]**: the worklist driver.

pub mod boxes;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod exec;
pub mod fa;
pub mod fixpoint;
pub mod fold;
pub mod frame;
pub mod label;
pub mod loops;
pub mod normalize;
pub mod program;
pub mod registry;
pub mod ta;
pub mod table;
pub mod trace;
pub mod types;
pub mod utils;
