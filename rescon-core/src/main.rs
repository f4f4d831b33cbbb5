//! Rescon - Resource Container Runtime
//!
//! A small front end over `rescon_core`:
//! - prints version and usage
//! - runs a self-check that exercises a container and prints the registry

use anyhow::{Context, Result};
use rescon_core::{
    current, init, ContainerConfig, ContainerRegistry, ResourceContainer, ResourceProfile,
    RuntimeConfig,
};
use serde_json::json;
use tracing::info;

fn print_help() {
    println!("rescon - Resource Container Runtime v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  rescon [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help       Print this help message");
    println!("  -v, --version    Print version information");
    println!("  --snapshot       Run a self-check and print the container registry as JSON");
    println!();
    println!("ENVIRONMENT:");
    println!("  RESCON_LOG       Log filter directive (default: info)");
    println!("  RESCON_ASYNC_IO  Offload blocking file I/O on tokio workers (default: true)");
}

/// Create a container, use it from a thread and from a task, then destroy it.
async fn self_check() -> Result<serde_json::Value> {
    let container = ResourceContainer::create(
        ContainerConfig::new()
            .named("self-check")
            .with_profile(ResourceProfile::Standard),
    );

    let bound = container.run(|| current() == container)?;
    let bound_in_task = container.scope(async { current() }).await? == container;
    info!(container = %container.id(), bound, bound_in_task, "Self-check ran");

    let during = ContainerRegistry::global().snapshot();
    container.destroy()?;

    Ok(json!({
        "bound": bound && bound_in_task,
        "containers": during,
        "after_destroy": ContainerRegistry::global().snapshot(),
    }))
}

/// What the command line asks for.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Version,
    Serve { snapshot: bool },
    Unrecognized(String),
}

/// Parse arguments, program name excluded.
fn parse_args<I>(args: I) -> Command
where
    I: IntoIterator<Item = String>,
{
    let mut snapshot = false;
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => return Command::Help,
            "-v" | "--version" => return Command::Version,
            "--snapshot" => snapshot = true,
            _ => return Command::Unrecognized(arg),
        }
    }
    Command::Serve { snapshot }
}

#[tokio::main]
async fn main() -> Result<()> {
    let snapshot = match parse_args(std::env::args().skip(1)) {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            println!("rescon {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Serve { snapshot } => snapshot,
        Command::Unrecognized(arg) => {
            eprintln!("error: unrecognized argument '{}'", arg);
            eprintln!("Run 'rescon --help' for usage information.");
            std::process::exit(1);
        }
    };

    let config = RuntimeConfig::from_env()?;
    init(&config)?;

    if snapshot {
        let report = self_check().await?;
        let rendered =
            serde_json::to_string_pretty(&report).context("Failed to render snapshot")?;
        println!("{rendered}");
        return Ok(());
    }

    info!(
        containers = ContainerRegistry::global().len(),
        "Rescon runtime ready"
    );
    info!("Run 'rescon --help' for usage information");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_argv() {
        assert_eq!(parse_args(Vec::new()), Command::Serve { snapshot: false });
        // argv without even a program name
        assert_eq!(
            parse_args(Vec::<String>::new().into_iter().skip(1)),
            Command::Serve { snapshot: false }
        );
    }

    #[test]
    fn test_flags() {
        assert_eq!(parse_args(args(&["--snapshot"])), Command::Serve { snapshot: true });
        assert_eq!(parse_args(args(&["-h", "--snapshot"])), Command::Help);
        assert_eq!(parse_args(args(&["--version"])), Command::Version);
        assert_eq!(
            parse_args(args(&["--bogus"])),
            Command::Unrecognized("--bogus".to_string())
        );
    }
}
