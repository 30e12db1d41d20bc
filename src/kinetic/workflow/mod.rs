// SPDX-License-Identifier: MIT

pub mod approval;
pub mod checkpoint;
pub mod condition;
pub mod graph;
pub mod registry;
pub mod state;
