//! Domain model module declarations.

pub mod artifacts;
pub mod result;
pub mod role;
