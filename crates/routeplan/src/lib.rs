//! Route planning domain logic.
//!
//! Routes are ordered sequences of stops; each positioned stop carries the
//! distance, travel time, and road geometry of the leg arriving at it. The
//! [`SegmentEngine`] keeps that structure consistent under appends,
//! removals, reorders, and stop relocations while calling the external
//! [`RouteProvider`] only for legs that actually changed.

pub mod engine;
pub mod error;
pub mod history;
pub mod locks;
pub mod memory;
pub mod models;
pub mod provider;
pub mod store;

pub use engine::SegmentEngine;
pub use error::{Error, Result};
pub use locks::RouteLocker;
pub use memory::MemoryStore;
pub use models::*;
pub use provider::{ComputedLeg, RouteProvider};
pub use store::{PlannerStore, StoreTx};
