#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use neuropil_core::pkg::DEFAULT_CONCURRENCY;
use neuropil_core::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "neuropil")]
#[command(author, version, about = "Install modules from a CouchDB registry", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Install packages and their dependencies
    Install {
        /// Packages to install (e.g., "jquery", "jquery@~1.9.0", "@scope/pkg@^2")
        #[arg(required = true)]
        packages: Vec<String>,

        /// Install directory (default: ./neuropil_modules)
        #[arg(long, value_name = "PATH")]
        dir: Option<PathBuf>,

        /// Manifest key to read dependencies from; repeatable, dotted paths allowed
        #[arg(long = "key", value_name = "KEY")]
        keys: Vec<String>,

        /// Install only the named packages, not their dependencies
        #[arg(long)]
        no_recursive: bool,

        /// Never let a prerelease satisfy a range
        #[arg(long)]
        stable_only: bool,

        /// Only consider prereleases on this channel (e.g., "beta")
        #[arg(long, value_name = "CHANNEL")]
        prerelease: Option<String>,

        /// Resolve as for saving into a manifest (implies --stable-only)
        #[arg(long)]
        save: bool,

        /// Maximum concurrent downloads
        #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Registry URL (overrides NEUROPIL_REGISTRY)
        #[arg(long, value_name = "URL")]
        registry: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Install {
            packages,
            dir,
            keys,
            no_recursive,
            stable_only,
            prerelease,
            save,
            concurrency,
            registry,
        }) => {
            let action = commands::install::InstallAction {
                packages,
                dir,
                keys,
                recursive: !no_recursive,
                stable_only,
                prerelease,
                save,
                concurrency,
                registry,
            };
            commands::install::run(&config, action, cli.json)
        }
        Some(Commands::Version) | None => commands::version::run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_install_flags() {
        let cli = Cli::try_parse_from([
            "neuropil",
            "--json",
            "install",
            "jquery@~1.9.0",
            "@scope/a",
            "--key",
            "dependencies",
            "--key",
            "cortex.dependencies",
            "--prerelease",
            "beta",
            "--no-recursive",
        ])
        .unwrap();

        assert!(cli.json);
        let Some(Commands::Install {
            packages,
            keys,
            prerelease,
            no_recursive,
            concurrency,
            ..
        }) = cli.command
        else {
            panic!("expected install");
        };
        assert_eq!(packages, vec!["jquery@~1.9.0", "@scope/a"]);
        assert_eq!(keys, vec!["dependencies", "cortex.dependencies"]);
        assert_eq!(prerelease.as_deref(), Some("beta"));
        assert!(no_recursive);
        assert_eq!(concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_install_requires_package() {
        assert!(Cli::try_parse_from(["neuropil", "install"]).is_err());
    }
}
