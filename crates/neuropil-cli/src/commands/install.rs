//! `neuropil install` command.

use miette::{miette, IntoDiagnostic, Result};
use neuropil_core::pkg::{install, LedgerSnapshot, PkgError, RegistryClient, RegistryConfig};
use neuropil_core::Config;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Parsed `install` arguments.
#[derive(Debug, Clone)]
pub struct InstallAction {
    pub packages: Vec<String>,
    pub dir: Option<PathBuf>,
    pub keys: Vec<String>,
    pub recursive: bool,
    pub stable_only: bool,
    pub prerelease: Option<String>,
    pub save: bool,
    pub concurrency: usize,
    pub registry: Option<String>,
}

#[derive(Debug, Serialize)]
struct InstallResult {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    install: Option<LedgerSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize)]
struct ErrorInfo {
    code: &'static str,
    message: String,
}

impl From<&PkgError> for ErrorInfo {
    fn from(err: &PkgError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

pub fn run(config: &Config, action: InstallAction, json: bool) -> Result<()> {
    let options = config
        .install_options(action.packages, action.dir.as_deref())
        .with_dependency_keys(action.keys)
        .with_recursive(action.recursive)
        .with_stable_only(action.stable_only)
        .with_prerelease_channel(action.prerelease)
        .with_save(action.save)
        .with_concurrency(action.concurrency);

    let mut registry_config = RegistryConfig::from_env();
    if let Some(url) = action.registry {
        registry_config = registry_config.with_url(url);
    }

    info!(
        registry = %registry_config.url,
        dir = %options.install_dir.display(),
        packages = options.packages.len(),
        "install"
    );

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let result = runtime.block_on(async {
        let client = RegistryClient::new(&registry_config)?;
        install(client, &options).await
    });

    match result {
        Ok(snapshot) => {
            if json {
                let out = InstallResult {
                    ok: true,
                    install: Some(snapshot),
                    error: None,
                };
                println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
            } else {
                for warning in &snapshot.warnings {
                    eprintln!("warning: {warning}");
                }
                for key in &snapshot.installed {
                    println!("+ {key}");
                }
            }
            Ok(())
        }
        Err(err) => {
            if json {
                let out = InstallResult {
                    ok: false,
                    install: None,
                    error: Some(ErrorInfo::from(&err)),
                };
                println!("{}", serde_json::to_string_pretty(&out).into_diagnostic()?);
                std::process::exit(2);
            }
            Err(miette!(code = err.code(), "{err}"))
        }
    }
}
