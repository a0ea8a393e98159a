//! PawScript: an embeddable interpreter for a small C-like scripting
//! language with first-class native interoperation.
//!
//! Script code can call arbitrary host functions by symbol, and host code
//! can obtain ordinary function pointers to script-defined functions that
//! are callable through the platform's calling convention. A scope-aware
//! memory lifecycle (`new`, `adopt`, `promote`, `delete`, `scoped`) keeps
//! the dynamic-runtime flavour while preserving systems-language ABI
//! compatibility.
//!
//! ```
//! use pawscript::PawScriptContext;
//!
//! let mut context = PawScriptContext::new();
//! context.run("u32 x = 3; u32 y = 4; return x + y;").unwrap();
//! let mut out = [0u8; 4];
//! assert!(context.get(pawscript::RESULT_NAME, &mut out));
//! assert_eq!(u32::from_le_bytes(out), 7);
//! ```

pub mod error;
pub mod ffi;
pub mod interpreter;
pub mod lexer;
pub mod memory;
pub mod scope;
pub mod types;

pub use error::{ErrorKind, PawError};
pub use ffi::trampoline::VarargItem;
pub use interpreter::{
    FsResolver, PawScriptContext, SourceResolver, SymbolVisibility, RESULT_NAME,
};
