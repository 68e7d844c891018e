//! Reference decoders shipped with the registry.
//!
//! `union_find` and `prior` run in the calling process; `external` adapts any
//! command-line decoder that speaks the file protocol.

mod external;
mod prior;
mod union_find;

pub use external::ExternalCommandDecoder;
pub use prior::PriorDecoder;
pub use union_find::UnionFindFileDecoder;
