//! Standard memory orderings for the lock-free list.
//!
//! These constants keep ordering usage consistent across the codebase and
//! make the pairing explicit at each access point.

use std::sync::atomic::Ordering;

/// Ordering for traversal loads of a `next` pointer.
/// Pairs with the writer's [`LINK_ORD`] publication store.
pub const SEARCH_ORD: Ordering = Ordering::Acquire;

/// Ordering for the store that links a new node into a level.
/// Publishes every prior write to the node (key, value, down, next)
/// to any reader whose acquire load observes it.
pub const LINK_ORD: Ordering = Ordering::Release;

/// Ordering for stores into a node that is still private to the writer.
/// The node becomes visible only through a later [`LINK_ORD`] store.
pub const INIT_ORD: Ordering = Ordering::Relaxed;

/// Ordering for key-count bookkeeping. Counter only, synchronizes nothing.
pub const LEN_ORD: Ordering = Ordering::Relaxed;
