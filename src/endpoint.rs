//! Endpoint Gateway (EG): the single privileged client holding browser
//! automation capabilities (§2, §4.2).
//!
//! Split into a persistent connection [`holder`] and an evictable [`worker`],
//! per the source's service-worker-eviction idiom (§9). Resources the worker
//! touches — tab locks, injected scripts, captures, debug sessions — live
//! behind one [`registry::ResourceRegistry`].

pub mod domain_types;
pub mod holder;
pub mod observer;
pub mod registry;
pub mod worker;
