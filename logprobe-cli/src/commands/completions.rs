//! Shell completion generation and installation.

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use console::style;
use directories::BaseDirs;
use std::env;
use std::fs;
use std::io;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::Cli;

const BIN_NAME: &str = "logprobe";

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, out);
}

/// Detect the user's current shell from environment.
pub(crate) fn detect_shell_type() -> Option<Shell> {
    if let Ok(shell_path) = env::var("SHELL") {
        return shell_from_path(&shell_path);
    }

    // PSModulePath is set in every PowerShell session.
    if cfg!(windows) && env::var("PSModulePath").is_ok() {
        return Some(Shell::PowerShell);
    }

    None
}

/// Parse a shell binary path into its `Shell` enum.
fn shell_from_path(shell_path: &str) -> Option<Shell> {
    let shell_name = Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    match shell_name {
        "bash" => Some(Shell::Bash),
        "zsh" => Some(Shell::Zsh),
        "fish" => Some(Shell::Fish),
        "elvish" => Some(Shell::Elvish),
        "pwsh" | "powershell" => Some(Shell::PowerShell),
        _ => None,
    }
}

/// User directories completion scripts are installed under.
struct InstallDirs {
    home: PathBuf,
    config: PathBuf,
    data: PathBuf,
}

impl InstallDirs {
    fn from_system() -> Result<Self> {
        let base = BaseDirs::new().context("Could not determine home directory")?;
        Ok(Self {
            home: base.home_dir().to_path_buf(),
            config: base.config_dir().to_path_buf(),
            data: base.data_local_dir().to_path_buf(),
        })
    }

    /// Completion script location for `shell`.
    fn completion_path(&self, shell: Shell) -> Result<PathBuf> {
        let path = match shell {
            Shell::Bash => self
                .data
                .join("bash-completion")
                .join("completions")
                .join(BIN_NAME),
            Shell::Zsh => self
                .home
                .join(".zfunc")
                .join(format!("_{BIN_NAME}")),
            Shell::Fish => self
                .config
                .join("fish")
                .join("completions")
                .join(format!("{BIN_NAME}.fish")),
            Shell::PowerShell => env::var("PROFILE")
                .ok()
                .and_then(|profile| {
                    Path::new(&profile)
                        .parent()
                        .map(Path::to_path_buf)
                })
                .unwrap_or_else(|| {
                    self.config
                        .join("powershell")
                        .join("completions")
                })
                .join(format!("{BIN_NAME}.ps1")),
            Shell::Elvish => self
                .config
                .join("elvish")
                .join("lib")
                .join(format!("{BIN_NAME}.elv")),
            _ => anyhow::bail!("Unsupported shell for auto-install"),
        };
        Ok(path)
    }
}

/// Install shell completions automatically.
pub(crate) fn cmd_completions_install(shell_arg: Option<Shell>) -> Result<()> {
    let shell = match shell_arg {
        Some(s) => s,
        None => detect_shell_type().context(
            "Could not detect your shell. Please specify it explicitly:\n  \
             logprobe completions --install bash",
        )?,
    };

    let dirs = InstallDirs::from_system()?;
    let path = install_completions(shell, &dirs)?;

    eprintln!(
        "{} Installed {} completions to {}",
        style("✓").green().bold(),
        style(format!("{shell:?}")).cyan(),
        style(path.display()).yellow()
    );

    match shell {
        Shell::Bash => {
            eprintln!();
            eprintln!("Completions will be loaded automatically on new terminals.");
            eprintln!(
                "To activate now: {}",
                style(format!("source {}", path.display())).cyan()
            );
        },
        Shell::Zsh => {
            if let Some(zshrc) = ensure_zsh_fpath(&dirs.home)? {
                eprintln!(
                    "{} Added fpath to {}",
                    style("✓").green().bold(),
                    style(zshrc.display()).yellow()
                );
            }
            eprintln!();
            eprintln!("Restart your shell or run: {}", style("exec zsh").cyan());
        },
        Shell::PowerShell => {
            eprintln!();
            eprintln!("Add this to your PowerShell profile to load on startup:");
            eprintln!(
                "  {}",
                style(format!("Import-Module {}", path.display())).cyan()
            );
        },
        _ => {
            eprintln!();
            eprintln!("Completions will be loaded automatically on new sessions.");
        },
    }

    Ok(())
}

fn install_completions(shell: Shell, dirs: &InstallDirs) -> Result<PathBuf> {
    let path = dirs.completion_path(shell)?;

    let mut buf = Vec::new();
    write_completions(shell, &mut buf);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, &buf)
        .with_context(|| format!("Failed to write completion file: {}", path.display()))?;

    Ok(path)
}

/// Make sure `~/.zshrc` puts `~/.zfunc` on the fpath. Returns the file if it changed.
fn ensure_zsh_fpath(home: &Path) -> Result<Option<PathBuf>> {
    let zshrc = home.join(".zshrc");
    let fpath_line = "fpath=(~/.zfunc $fpath)";

    let present = fs::read_to_string(&zshrc).is_ok_and(|content| content.contains(fpath_line));
    if present {
        return Ok(None);
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&zshrc)
        .with_context(|| format!("Failed to update {}", zshrc.display()))?;
    writeln!(file, "\n# {BIN_NAME} completions")?;
    writeln!(file, "{fpath_line}")?;
    writeln!(file, "autoload -Uz compinit && compinit")?;
    Ok(Some(zshrc))
}
