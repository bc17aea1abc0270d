//! Value types exchanged with the remote content server during an upload.
//!
//! The transport itself lives outside this workspace; these types describe
//! what goes over it: the metadata sent when a session is created, the
//! repository context an import targets, the import response, and the
//! error taxonomy a transport reports back.

pub mod error;
pub mod types;

// Re-export primary types for convenience.
pub use error::ServerError;
pub use types::{FileMetadata, ImportResponse, RepoContext};
