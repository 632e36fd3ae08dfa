// memc-common - Shared types and wire definitions for the memc client
//
// This crate defines the cache item, the error taxonomy, and the binary
// protocol header layout shared by the client and the bench harness.

pub mod error;
pub mod protocol;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use protocol::*;
pub use types::*;
