// SPDX-License-Identifier: MIT

//! Condition parsing and evaluation
//!
//! Conditions are boolean expressions over properties, like:
//! - `interface_orientation == 'landscape'`
//! - `battery_level > 0.2 && !low_power_mode`
//! - `app_install_age > 7d || event_count('app_start') >= 10`

mod ast;
mod evaluator;
mod lexer;
mod parser;

pub use ast::{CompareOp, Condition, Expression, Literal};
pub use evaluator::{evaluate, evaluate_condition, evaluate_str};
pub use lexer::parse_duration;
pub use parser::parse;
