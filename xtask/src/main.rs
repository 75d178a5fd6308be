//! Development tasks for the tether workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Development tasks for tether")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format check, clippy, tests and docs
    Ci,
    /// Check formatting
    Fmt,
    /// Run clippy over all targets
    Clippy,
    /// Run tests
    Test {
        /// Only test this package
        #[arg(short, long)]
        package: Option<String>,
        /// Cases per property test
        #[arg(long, default_value_t = 256)]
        proptest_cases: u32,
        /// Log filter passed to the test subscriber
        #[arg(long)]
        log: Option<String>,
    },
    /// Build documentation, failing on broken intra-doc links
    Doc,
    /// Remove build artifacts
    Clean,
}

const PACKAGES: &[&str] = &["tether-client", "tether-testing"];

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            fmt(&sh)?;
            clippy(&sh)?;
            test(&sh, None, 256, None)?;
            doc(&sh)?;
            println!("CI checks passed.");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test {
            package,
            proptest_cases,
            log,
        } => test(&sh, package.as_deref(), proptest_cases, log.as_deref())?,
        Command::Doc => doc(&sh)?,
        Command::Clean => cmd!(sh, "cargo clean").run()?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let manifest = String::from_utf8(output.stdout).context("invalid UTF-8 in cargo output")?;
    Ok(PathBuf::from(manifest.trim())
        .parent()
        .context("manifest path has no parent")?
        .to_path_buf())
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>, proptest_cases: u32, log: Option<&str>) -> Result<()> {
    let mut args = vec!["--workspace".to_string()];
    if let Some(package) = package {
        if !PACKAGES.contains(&package) {
            bail!("unknown package `{package}`, expected one of {PACKAGES:?}");
        }
        args = vec!["--package".to_string(), package.to_string()];
    }

    println!("Running tests...");
    let _cases = sh.push_env("PROPTEST_CASES", proptest_cases.to_string());
    let _log = log.map(|filter| sh.push_env("RUST_LOG", filter));
    cmd!(sh, "cargo test {args...}").run()?;
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("Building documentation...");
    let _flags = sh.push_env("RUSTDOCFLAGS", "-D warnings");
    cmd!(sh, "cargo doc --workspace --no-deps").run()?;
    Ok(())
}
