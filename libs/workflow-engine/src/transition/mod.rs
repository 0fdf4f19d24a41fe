//! Transition evaluation for workflow progression
//!
//! Evaluates transition conditions to determine the next step
//! in a workflow based on step results and state.

pub mod conditions;
pub mod evaluator;

pub use conditions::*;
pub use evaluator::*;
