//! Per-connection pumps.

pub(crate) mod read;
pub(crate) mod write;
