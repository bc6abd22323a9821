//! Router Module Index
//!
//! Splits the routing table by access level. Authentication is attached as a
//! layer on the whole `authenticated` router, never per handler, so a new
//! protected route cannot be added without it.

/// Routes reachable without a session (reads and the identity flow).
pub mod public;

/// Routes behind the session middleware. Mutations also run the ownership check.
pub mod authenticated;
