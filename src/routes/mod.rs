// # Routes Module
//
// - HTTP route handlers for the Trickle server, one submodule per API area.
// - Each submodule exposes `create_routes()`, merged in `server::build_router`.

/// Liveness and readiness endpoints
pub mod health;

/// Allocation swap batches and saga resume
pub mod swaps;

/// Portfolio allocation management
pub mod portfolio;

/// Contract calls reporting investments
pub mod investments;

/// Chain API and log subscription notifications
pub mod webhooks;

/// Chat relay
pub mod chat;
