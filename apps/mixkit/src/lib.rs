// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

pub mod cli;
pub mod config;
pub mod logging;
pub mod simulate;

// Re-export commonly used items for convenience
pub use config::Config;
pub use simulate::{run, SimulationReport};
