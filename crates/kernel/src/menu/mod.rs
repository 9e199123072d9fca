//! Navigation menus contributed by extensions.
//!
//! Extensions hand [`NavigationItem`](trellis_sdk::types::NavigationItem)s to
//! their boot registrar; the [`NavigationManager`] merges them per menu
//! location and withdraws them again when an extension is disabled.

mod navigation;

pub use navigation::{
    AllowAll, Breadcrumb, CapabilityCheck, MAX_MENU_DEPTH, MenuItem, NavigationError,
    NavigationManager, NavigationStats,
};
