use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the workspace
    Build,
    /// Run the test suite
    Test,
    /// Check formatting and run clippy with warnings denied
    Lint,
    /// Run deviceutil, forwarding the remaining arguments
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{what} failed");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building workspace...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Tests")?;
        }
        Commands::Lint => {
            println!("Linting...");
            cargo(&["fmt", "--all", "--check"], "Format check")?;
            cargo(
                &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
                "Clippy",
            )?;
        }
        Commands::Run { args } => {
            println!("Running deviceutil...");
            let mut full = vec!["run", "-p", "mdk-cli", "--"];
            full.extend(args.iter().map(String::as_str));
            cargo(&full, "Run")?;
        }
    }

    Ok(())
}
