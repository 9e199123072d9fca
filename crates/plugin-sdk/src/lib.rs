//! Trellis Extension SDK
//!
//! Types and traits that extensions compile against. An extension implements
//! [`Extension`](extension::Extension), submits descriptors through the
//! [`Registrar`](extension::Registrar) handed to its boot hook, and may
//! contribute schema [`Migration`](extension::Migration)s. The kernel owns
//! everything that is registered; extensions never keep a writable reference.

pub mod extension;
pub mod render;
pub mod types;

// Re-export so extension crates can implement `Migration` without naming
// async-trait themselves.
#[doc(hidden)]
pub use async_trait::async_trait;

pub mod prelude {
    pub use crate::extension::*;
    pub use crate::render::*;
    pub use crate::types::*;
    pub use crate::async_trait;
}
