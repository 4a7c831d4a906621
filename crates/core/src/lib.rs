//! Domain logic for the lab data catalog. No database access lives here.

pub mod config;
pub mod dataview;
pub mod error;
pub mod geometry;
pub mod hierarchy;
pub mod kind;
pub mod permissions;
pub mod plugins;
pub mod slug;
pub mod status;
pub mod tag;
pub mod term;
pub mod types;
