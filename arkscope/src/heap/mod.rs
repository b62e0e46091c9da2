//! # Heap Decoding
//!
//! Turns the raw words found in frames into method identities:
//!
//! ```text
//! frame slot ──▶ tagged value ──▶ function object ──▶ hidden class (JS type)
//!                                       │
//!                                       ▼
//!                               method object ──▶ literal info (method id)
//!                                       │             file pointer
//!                                       ▼
//!                               bytecode start (for bytecode offsets)
//! ```
//!
//! - [`tagged`]: decode value words once into [`HeapValue`]
//! - [`layout`]: object field offsets of the supported runtime ABI
//! - [`resolver`]: the frame → method chain, plus machine-code lookup for
//!   fast-JIT functions

pub mod layout;
pub mod resolver;
pub mod tagged;

pub use layout::HeapLayout;
pub use resolver::{MachineCodeInfo, MethodIdentityResolver, ResolvedMethod};
pub use tagged::{HeapValue, ObjectKind};
