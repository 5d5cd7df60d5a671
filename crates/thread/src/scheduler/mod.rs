//! Lane schedulers -- admission control and the rights protocol.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor, accessors and tuning knobs
//! - `admission`: qualification, queueing and the start-or-queue decision
//! - `rights`: request/release propagation and root dispatch
//! - `policy`: qualifier and comparator strategies
//! - `selector`: the rights-selector seam and round-robin selection
//! - `percentage`: load-target rights selection

mod admission;
mod core;
mod percentage;
mod policy;
mod rights;
mod selector;
#[cfg(test)]
mod tests;

pub use self::core::{RightsAccounting, Scheduler};
pub use self::percentage::PercentageLoadSelector;
pub use self::policy::{ChildQualifier, QueueComparator, Qualifier, ShareCap};
pub use self::selector::{Handoff, RightsSelector, RoundRobinSelector};
