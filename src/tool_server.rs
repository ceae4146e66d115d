//! Tool-Server Client (TSC) + Operation Manager (OM): the component
//! embedding a relay client and tracking every operation it issues through
//! to a terminal state, durably, across restarts (§4.3).

pub mod client;
pub mod domain_types;
pub mod operation_manager;
pub mod persistence;
