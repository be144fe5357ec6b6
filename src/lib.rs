//! Infrastructure for a bytecode virtual machine for the YAPL programming language.

#![warn(missing_debug_implementations)]
#![warn(missing_docs)]

mod chunk;
mod compile;
mod error;
mod heap;
mod native;
mod object;
mod opcode;
mod scan;
mod table;
mod token;
mod value;
mod vm;

pub use chunk::*;
pub use compile::*;
pub use error::*;
pub use heap::*;
pub use native::{NativeContext, NativeFn};
pub use object::*;
pub use opcode::*;
pub use scan::*;
pub use table::*;
pub use token::*;
pub use value::*;
pub use vm::*;
