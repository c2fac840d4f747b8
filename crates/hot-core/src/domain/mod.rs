//! Per-connection state for a dispatcher.
//!
//! This module contains pure state-keeping with no socket or runtime
//! dependencies.  The dispatchers in `hot-client` and `hot-server` own one
//! [`table::RecordTable`] each and mutate it from a single task, so none of
//! these types need locks.

/// Last-activity timestamp shared by a record and its emitters.
pub mod activity;

/// Dispatcher tuning parameters.
pub mod config;

/// Outbound envelope production for one connection.
pub mod emitter;

/// Connection Record and its lifecycle state machine.
pub mod record;

/// The dispatcher-owned map of live records.
pub mod table;
