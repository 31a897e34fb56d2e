//! Data Transfer Objects for REST response serialization.

pub mod session_dto;

pub use session_dto::*;
