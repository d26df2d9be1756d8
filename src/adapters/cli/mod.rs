//! CLI Adapter
//!
//! Command-line interface for dexpilot.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    execute, paper_context, CliApp, Command, ExecuteCmd, InitConfigCmd, PlanCmd, RadarCmd, ReportCmd,
};

/// Initialize the CLI application
pub fn init() -> CliApp {
    use clap::Parser;
    CliApp::parse()
}
