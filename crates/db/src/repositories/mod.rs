//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument. Methods ending in `_in` take a
//! `&mut PgConnection` so callers can compose them inside a transaction.

pub(crate) mod object;

pub mod attachment_repo;
pub mod bootstrap_repo;
pub mod dataview_repo;
pub mod permission_repo;
pub mod project_repo;
pub mod sample_repo;
pub mod tag_repo;
pub mod term_repo;
pub mod user_repo;

pub use attachment_repo::AttachmentRepo;
pub use bootstrap_repo::BootstrapRepo;
pub use dataview_repo::DataViewRepo;
pub use permission_repo::PermissionRepo;
pub use project_repo::ProjectRepo;
pub use sample_repo::SampleRepo;
pub use tag_repo::TagRepo;
pub use term_repo::TermRepo;
pub use user_repo::UserRepo;
