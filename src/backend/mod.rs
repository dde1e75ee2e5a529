//! External collaborators of the limiter
//!
//! The account store, identity provider and usage archive are traits so the
//! limiter can run against a hosted backend or the local implementations here.

pub mod archive;
pub mod file;
pub mod fs;
pub mod identity;
pub mod memory;
pub mod store;

pub use archive::{FileUsageArchive, MemoryUsageArchive, UsageArchive};
pub use file::FileAccountStore;
pub use identity::{AuthUser, IdentityProvider, LocalIdentity};
pub use memory::MemoryAccountStore;
pub use store::{AccountStore, RecordSubscription};
