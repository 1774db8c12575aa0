//! Typed views over the store primitives. Write paths are pure op
//! builders composed by the applier into one atomic batch; read paths go
//! through the [`crate::redis::Client`] seam.

pub mod dedup;
pub mod feed;
pub mod profile;
pub mod ranking;
