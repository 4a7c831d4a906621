//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - A `Deserialize` create DTO for inserts
//! - A `Deserialize` update DTO (all `Option` fields) for patches

pub mod attachment;
pub mod dataview;
pub mod object;
pub mod permission;
pub mod project;
pub mod sample;
pub mod tag;
pub mod term;
pub mod user;
