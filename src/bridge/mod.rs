//! Bridges between the LLVM-like IR and the graph.
//!
//! [`construct`] turns a module of CFGs into an RVSDG; [`destruct`] structures a
//! graph back into CFGs. On reducible inputs the round trip preserves the
//! observable semantics: same return values, same memory trace.

pub mod construct;
pub mod destruct;

pub use construct::construct;
pub use destruct::destruct;
