//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Reactive configuration renderer
#[derive(Parser, Debug)]
#[command(
    name = "reconf",
    version = env!("CARGO_PKG_VERSION"),
    about = "Render configuration files from templates and data sources",
    long_about = "Render templates described by a YAML manifest, \
                  then keep outputs up to date as inputs change.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to a settings file (default: reconf.toml)
    #[arg(short, long, global = true, env = "RECONF_SETTINGS")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Render every unit, then watch the units that ask for it
    #[command(
        about = "Render the manifest and watch for changes",
        after_help = "Examples:\n  \
                      reconf run\n  \
                      reconf run --manifest /etc/reconf/config.yml\n  \
                      RECONF_WATCH__AWAIT_WRITE_MS=0 reconf run"
    )]
    Run {
        /// Manifest path (overrides settings)
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// Validate the manifest without rendering
    #[command(about = "Parse and validate the manifest")]
    Check {
        /// Manifest path (overrides settings)
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// Show the effective settings
    #[command(about = "Display active settings as TOML")]
    Config,
}

impl Cli {
    /// The subcommand to run; `run` when none was given.
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or(Commands::Run { manifest: None })
    }
}
