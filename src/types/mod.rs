//! Shared data structures for the assembly line
//!
//! - `MachineOrder` / `OrderId`: work items arriving from the ERP side
//! - `Report`: the manufacturing timeline published once an order finishes

mod order;
mod report;

pub use order::*;
pub use report::*;
