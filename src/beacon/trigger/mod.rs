// SPDX-License-Identifier: MIT

//! Trigger matching state: the indexed trigger snapshot and throttle ledger

mod store;
mod table;
mod throttle;

pub use store::{JsonFileThrottleStore, MemoryThrottleStore, ThrottleStore};
pub use table::{CompiledAction, TriggerSnapshot, TriggerTable};
pub use throttle::{Acquire, ThrottleLedger, ThrottlePolicy, ThrottleState};
