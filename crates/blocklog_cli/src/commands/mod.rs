//! CLI command implementations.

pub mod extract;
pub mod inspect;
pub mod repair;
pub mod trim;
pub mod vacuum;
pub mod verify;
