// SPDX-License-Identifier: MIT

//! State management for graph workflows
//!
//! This module provides:
//! - `StateSchema` - declares every field and its merge rule
//! - `WorkflowState` - runtime state storage with reducer support
//! - `StateUpdate` - the partial update a node returns

mod schema;
mod store;

pub use schema::{FieldType, ReducerType, StateFieldDef, StateSchema};
pub use store::{StateUpdate, WorkflowState};
