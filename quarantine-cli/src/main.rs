// Copyright (c) The quarantine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use color_eyre::Result;
use quarantine_cli::QuarantineApp;

fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = enable_ansi_support::enable_ansi_support();

    let app = QuarantineApp::parse();
    let output = app.init_output();
    app.exec(output, &mut std::io::stdout().lock())
}
