// SPDX-License-Identifier: MIT

pub mod config;
pub mod drill;
pub mod workflow;
