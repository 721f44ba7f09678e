// SPDX-License-Identifier: MIT

pub mod beacon;
pub mod eval;
