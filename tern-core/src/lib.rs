//! Core of the Tern toolchain.
//!
//! The pipeline is roughly:
//!
//!   source .tern
//!     -> lexer / parser   (range-annotated AST + syntax diagnostics)
//!     -> typecheck        (interface phase, then bodies)
//!     -> hir_lower        (classes, closures and matches flattened)
//!     -> mir_lower        (basic blocks over 32-bit temporaries)
//!     -> optimizer        (iterated MIR passes)
//!     -> codegen_wasm / codegen_asm
//!
//! The CLI and the wasm host depend on this crate rather than
//! reimplementing any stage.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod span;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing, parsing and formatting
// ---------------------------------------------------------------------

pub mod lexer;
pub mod parser;
pub mod ast;
pub mod printer;

// ---------------------------------------------------------------------
// Semantic layers: types, interfaces, type checking
// ---------------------------------------------------------------------

pub mod types;
pub mod interface;
pub mod builtins;
pub mod typecheck;

// ---------------------------------------------------------------------
// Intermediate representations and analyses
// ---------------------------------------------------------------------

pub mod hir;
pub mod hir_lower;
pub mod mir;
pub mod mir_lower;
pub mod cfg;
pub mod dataflow;
pub mod interpreter;
pub mod optimizer;

// ---------------------------------------------------------------------
// Back-end: code generation and compiler orchestration
// ---------------------------------------------------------------------

pub mod codegen_wasm;
pub mod codegen_asm;
pub mod compiler;

// ---------------------------------------------------------------------
// Editor queries
// ---------------------------------------------------------------------

pub mod services;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{
    CompilationArtifact, CompilerOptions, SourceFile, check_sources, compile, discover_sources,
    source_map,
};
pub use diagnostic::{Diagnostic, Diagnostics, ErrorKind};
pub use error::CoreError;
pub use optimizer::OptimizerConfig;
pub use printer::format_source;
pub use services::LanguageServices;
pub use span::{Location, ModuleReference, Position};
