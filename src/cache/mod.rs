pub mod content;
pub mod named;

pub use content::{ContentCache, ContentEntry, InodeKey};
pub use named::NamedCache;
