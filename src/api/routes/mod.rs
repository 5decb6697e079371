//! API route modules.

pub mod exam;
pub mod recordings;
