//! Session provider: the authenticated mail and storage capabilities the
//! pipeline runs against.
//!
//! Credential acquisition and refresh happen outside this crate; a backend is
//! handed an already-valid token.

pub mod google;
pub mod memory;
pub mod traits;

pub use google::{GoogleEndpoints, GoogleSession};
pub use memory::MemorySession;
pub use traits::{MailService, ObjectStore, Session};
