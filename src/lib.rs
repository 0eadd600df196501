//! waypoint is an embeddable DNS protocol engine: a wire codec with name
//! compression, a record model covering the common record types, a UDP
//! server that answers unicast and mDNS queries through a caller supplied
//! resolver, and an SRV based service discovery cache.

pub mod buffer;
pub mod discovery;
pub mod protocol;
pub mod query_type;
pub mod server;
