// SPDX-FileCopyrightText: © 2025 MixKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use clap::Parser;

use mixkit_server::{cli, logging};

fn main() {
    let cli = cli::Cli::parse();
    cli::handle_command(&cli, logging::init_logging);
}
