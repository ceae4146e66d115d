//! Coordination & Health Layer (CHL): per-tab locking, passive health, and
//! reconnect backoff shared by the Endpoint Gateway and Tool-Server Client
//! (§2, §4.4).

pub mod health;
pub mod reconnect;
pub mod tab_lock;
