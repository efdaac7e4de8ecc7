//! Live-event tracking and notification-channel lifecycle engine.
//!
//! Consumes live sporting-event state from an external scoreboard provider
//! and keeps a set of ephemeral chat channels synchronized with it. Two
//! independent managers share the feed and the channel platform:
//!
//! - [`reconcile::Reconciler`] converges per-league score channels on a
//!   fixed tick: channels are created when events appear, renamed as scores
//!   move, deleted (after a linger) when events finish, and swept when
//!   events vanish from the schedule.
//! - [`session::SessionTracker`] runs dedicated play-by-play sessions for
//!   individual events on behalf of a command front-end, narrating tokened
//!   stream updates into a channel until the event completes.
//!
//! Nothing is persisted: a restart re-derives all channel state on the first
//! reconciliation tick, and sessions must be started again.

pub mod config;
pub mod feed;
pub mod leagues;
pub mod models;
pub mod pacing;
pub mod platform;
pub mod reconcile;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;
