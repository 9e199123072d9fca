//! Trellis Kernel Library
//!
//! Extension lifecycle (discovery, dependency ordering, migrations,
//! activation), the template/layout/block registries, navigation merging,
//! and the template renderer that composes them at request time.
//! The `trellis` binary is a thin administrative CLI over this library.

pub mod config;
pub mod menu;
pub mod plugin;
pub mod registry;
pub mod theme;
