// SPDX-License-Identifier: MIT

//! Condition language for declarative routers
//!
//! Conditions are evaluated against the merged workflow state after a node
//! runs. Examples:
//! - `issue_type == 'refund_request'`
//! - `confidence < 0.6 or fallback_reason == 'circuit_open'`
//! - `not (degraded_mode and retry_count >= 3)`
//! - `pending_action` (truthy check)

mod ast;
mod evaluator;
mod parser;

pub use ast::{CompareOp, Expression, Literal};
pub use evaluator::evaluate;
pub use parser::{parse, ParseError};
