//! ADP template core (spec.md §4.H): parser, frame/evaluator, registered
//! tags and the exception model (`RETURN`/`BREAK`/`ABORT`/`OVERFLOW`).
//! Embedding a real scripting language is out of scope (spec.md §1);
//! [`BasicEngine`] is the trivial built-in [`ScriptEngine`] that keeps the
//! crate runnable and testable without one.

pub mod basic_engine;
pub mod eval;
pub mod parser;
pub mod tags;

pub use basic_engine::BasicEngine;
pub use eval::{AdpFrame, Evaluator, Exception, ScriptEngine, ScriptOutcome};
pub use parser::{parse, Block};
pub use tags::{TagKind, TagRegistry};

pub const MAX_INCLUDE_DEPTH: usize = 64;
