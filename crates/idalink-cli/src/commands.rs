//! Subcommand implementations.
//!
//! Each command writes its result to `out`; progress from the core goes to
//! stderr.

use anyhow::{bail, Context, Result};
use idalink_core::settings::install_dir_from_env;
use idalink_core::{
    parse_link, CancellationToken, Discovery, DispatchOptions, Dispatcher, IdaLinkError,
    Instance, LaunchConfig, LaunchDefaults, Launcher, Settings,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Launch knobs shared by `open-link` and `launch`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchFlags {
    pub timeout_secs: Option<u64>,
    pub skip_analysis: bool,
}

impl LaunchFlags {
    fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug)]
pub enum SearchPathAction {
    Add(PathBuf),
    List,
    Remove(PathBuf),
}

#[derive(Debug)]
pub enum InstallAction {
    Add {
        name: String,
        dir: PathBuf,
        default: bool,
    },
    List,
    Remove(String),
    Default(String),
}

fn print_progress(message: &str) {
    eprintln!("{}", message);
}

/// Executable for launching, if one can be resolved.
///
/// A running instance may already hold the database, so a missing install is
/// only an error once a launch is actually needed.
fn usable_executable(settings: &Settings) -> Option<PathBuf> {
    match settings.resolve_executable_path(install_dir_from_env().as_deref()) {
        Ok(path) => Some(path),
        Err(IdaLinkError::NoInstallation) => None,
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}

pub fn open_link(
    settings: &Settings,
    uri: &str,
    auto_launch: bool,
    flags: LaunchFlags,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    let link = parse_link(uri)?;
    let options = DispatchOptions {
        auto_launch,
        search_roots: settings.search_roots(),
        executable: if auto_launch {
            usable_executable(settings)
        } else {
            None
        },
        timeout: flags.timeout(),
        skip_analysis_wait: flags.skip_analysis,
    };
    debug!("Dispatching {} with {:?}", link.uri, options);

    let report = Dispatcher::new().open_link(&link, &options, &mut print_progress, cancel)?;
    writeln!(
        out,
        "Opened {} in IDA (PID {}{})",
        link.workspace,
        report.instance.pid(),
        if report.launched { ", newly launched" } else { "" }
    )?;
    Ok(())
}

pub fn list_instances(json: bool, out: &mut impl Write) -> Result<()> {
    let instances = Discovery::new().list_instances_with_info();
    render_instances(&instances, json, out)
}

fn render_instances(instances: &[Instance], json: bool, out: &mut impl Write) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, instances)?;
        writeln!(out)?;
        return Ok(());
    }

    if instances.is_empty() {
        writeln!(out, "No running IDA instances found")?;
        return Ok(());
    }
    for instance in instances {
        writeln!(
            out,
            "{:>7}  {:<32}  {}",
            instance.pid(),
            instance.workspace_name().unwrap_or("(no database)"),
            instance.endpoint()
        )?;
    }
    Ok(())
}

pub fn launch(
    settings: &Settings,
    idb: &Path,
    flags: LaunchFlags,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    let executable = settings.resolve_executable_path(install_dir_from_env().as_deref())?;

    let mut config = LaunchConfig::default().with_skip_analysis_wait(flags.skip_analysis);
    if let Some(total) = flags.timeout() {
        config = config.with_overall_timeout(total, LaunchDefaults::SOCKET_SHARE);
    }

    let result = Launcher::new().with_config(config).launch_and_wait(
        &executable,
        idb,
        &mut print_progress,
        cancel,
    );
    let (instance, _process) = result.into_result()?;
    writeln!(
        out,
        "IDA ready (PID {}) with {}",
        instance.pid(),
        instance.workspace_name().unwrap_or("(no database)")
    )?;
    Ok(())
}

pub fn search_path(config_path: &Path, action: SearchPathAction, out: &mut impl Write) -> Result<()> {
    let mut settings = Settings::load(config_path)?;

    match action {
        SearchPathAction::Add(path) => {
            if settings.add_search_path(&path)? {
                settings.save(config_path)?;
                writeln!(out, "Added search path: {}", path.display())?;
            } else {
                writeln!(out, "Already a search path: {}", path.display())?;
            }
        }
        SearchPathAction::List => {
            if settings.search_paths.is_empty() {
                writeln!(out, "No search paths configured")?;
            }
            for path in &settings.search_paths {
                if path.exists() {
                    writeln!(out, "{}", path.display())?;
                } else {
                    writeln!(out, "{} (not found)", path.display())?;
                }
            }
        }
        SearchPathAction::Remove(path) => {
            if !settings.remove_search_path(&path) {
                bail!("{} is not a configured search path", path.display());
            }
            settings.save(config_path)?;
            writeln!(out, "Removed search path: {}", path.display())?;
        }
    }
    Ok(())
}

pub fn install(config_path: &Path, action: InstallAction, out: &mut impl Write) -> Result<()> {
    let mut settings = Settings::load(config_path)?;

    match action {
        InstallAction::Add { name, dir, default } => {
            let dir = dir
                .canonicalize()
                .with_context(|| format!("Cannot use install directory {}", dir.display()))?;
            settings.add_install(&name, &dir, default)?;
            settings.save(config_path)?;
            writeln!(out, "Added install {}: {}", name, dir.display())?;
        }
        InstallAction::List => {
            if settings.installs.is_empty() {
                writeln!(out, "No installs configured")?;
            }
            for (name, dir) in &settings.installs {
                let marker = if settings.default_install.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                writeln!(out, "{} {}  {}", marker, name, dir.display())?;
            }
        }
        InstallAction::Remove(name) => {
            if !settings.remove_install(&name) {
                bail!("unknown install: {}", name);
            }
            settings.save(config_path)?;
            writeln!(out, "Removed install {}", name)?;
        }
        InstallAction::Default(name) => {
            settings.set_default_install(&name)?;
            settings.save(config_path)?;
            writeln!(out, "Default install: {}", name)?;
        }
    }
    Ok(())
}
