//! # Platformer Session Server
//!
//! Authoritative multiplayer session server for the competitive placement
//! platformer. It accepts many concurrent player connections over TCP,
//! relays position and state updates among them with minimal latency, and
//! manages the lifecycle of game rooms: creation, joining, readiness, round
//! progression and scoring.
//!
//! ## Architecture
//!
//! One tokio task per connection, all tasks executing concurrently against
//! two shared structures: the client registry and the room table. Each
//! structure sits behind its own lock; there is no global lock serializing
//! the server. Per-session output is exclusive-write, so concurrent
//! broadcasts and direct replies never interleave partial frames on one
//! socket. Everything is constructed at startup and injected; components
//! hold `Arc` handles rather than reaching for globals.
//!
//! The server simulates no physics. Clients race on their own machines and
//! the server relays their state, arbitrates rooms and phases, and scores
//! finish order.
//!
//! ## Module Organization
//!
//! - [`registry`]: connection sessions (socket write half + liveness) and
//!   the id-to-session map with last-known player states
//! - [`broadcast`]: snapshot-based fan-out with failure pruning
//! - [`rooms`]: room table, codes, membership, readiness
//! - [`game`]: round/phase engine and scoring
//! - [`session`]: per-connection read loop, dispatch and cleanup
//! - [`network`]: listener, accept loop and server wiring
//!
//! ## Failure Scoping
//!
//! No error below the accept loop is fatal. A transport error or malformed
//! frame terminates that one session; a failed send during a broadcast
//! prunes that one peer; an invalid request earns the requester a negative
//! response. The process outlives all of them.

pub mod broadcast;
pub mod game;
pub mod network;
pub mod registry;
pub mod rooms;
pub mod session;
