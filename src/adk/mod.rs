// SPDX-License-Identifier: MIT

//! Building blocks shared by workflow nodes: the error taxonomy, the tool
//! contract for external resources, and the resilience primitives that wrap
//! calls to them.

pub mod error;
pub mod resilience;
pub mod tool;
