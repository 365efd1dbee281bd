//! kiln: the back end of a small Lisp. Forms are generated into bytecode,
//! verified, optimized and finalized, then run on a stack machine with
//! closures and proper tail calls.

pub mod analysis;
pub mod compiler;
pub mod diagnostic;
pub mod encoder;
pub mod error;
pub mod generate;
pub mod isa;
pub mod lexer;
pub mod namespace;
pub mod optimize;
pub mod options;
pub mod reader;
pub mod value;
pub mod vm;

pub use compiler::Compiler;
pub use error::{CompileError, Error, Result};
pub use namespace::{Namespace, NamespaceRef, SharedNamespace};
pub use options::Options;
pub use value::{Symbol, Value};
pub use vm::{Arity, Closure, Procedure, Runnable, VmError};
