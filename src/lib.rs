//! The semantic middle-end of a SnuPL/1 compiler.
//!
//! The parser hands over a fully constructed [`ast::Scope`] tree whose nodes
//! carry source tokens and resolved symbols. This crate then does two
//! things:
//!
//! 1. [`check::Check::check`] type-checks every construct, reporting the
//!    first failure as a `(token, message)` diagnostic.
//! 2. [`ast::Scope::to_tac`] lowers a type-clean tree into labeled
//!    three-address code inside a [`tac::CodeBlock`], with short-circuit
//!    boolean evaluation and explicit array address arithmetic through the
//!    runtime helpers `DIM` and `DOFS`.
//!
//! Lexing, parsing, symbol table construction and back-end code generation
//! live elsewhere; the [`token`], [`types`], [`symbol`] and [`tac`] modules
//! are the façades this crate consumes them through.

pub mod ast;
pub mod check;
pub mod lower;
pub mod symbol;
pub mod tac;
pub mod token;
pub mod types;

pub use check::{Check, CheckError};
pub use token::Token;
pub use types::Type;
