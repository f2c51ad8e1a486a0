mod cli;
mod repl;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use owo_colors::OwoColorize;

use libmemsift::{
    find_process_by_name, LiveProcess, ProcessPort, ScanDescriptor, ScopedSuspend, Session,
    SnapshotProcess,
};

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(match cli.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }),
    )
    .init();

    match cli.command {
        Command::Scan {
            target,
            expr,
            types,
            step,
            suspend,
            limit,
        } => {
            let port = open_target(&target)?;
            let mut session = Session::new(port.clone())?;
            session.refresh_regions()?;

            let descriptor = ScanDescriptor::new(expr, types.to_set()).with_step(step);
            let added = {
                let _pause = suspend.then(|| ScopedSuspend::new(port.as_ref(), true));
                session.scan(&descriptor)?
            };

            println!(
                "{} {} matches",
                "[done]".bright_cyan(),
                added.to_string().bright_green()
            );
            for m in session.matches().take(limit) {
                let region = session
                    .find_region(m.addr)
                    .map(|r| if r.file.is_empty() { r.desc.clone() } else { r.file.clone() })
                    .unwrap_or_default();
                println!(
                    "{}  {:012x} {}: {} \t{}",
                    "[match]".bright_green(),
                    m.addr,
                    m.tag().to_string().green(),
                    m.value,
                    region.magenta()
                );
            }
            if added > limit {
                println!("{} {} more not shown", "[info]".bright_cyan(), added - limit);
            }
        }

        Command::Shell {
            target,
            types,
            step,
        } => {
            let port = open_target(&target)?;
            let session = Session::new(port)?;
            repl::Repl::new(session, types.to_set(), step).run()?;
        }

        Command::Snapshot {
            target,
            output,
            compress,
            level,
        } => {
            let port = open_target(&target)?;
            {
                let _pause = ScopedSuspend::new(port.as_ref(), false);
                libmemsift::snapshot::save(port.as_ref(), &output, compress, level)?;
            }
            println!(
                "{} snapshot written to {}.json / {}.memory",
                "[done]".bright_cyan(),
                output.display(),
                output.display()
            );
        }
    }
    Ok(())
}

/// Resolve a target argument: a PID, a process name, or a snapshot sidecar.
fn open_target(target: &str) -> anyhow::Result<Arc<dyn ProcessPort>> {
    if target.ends_with(".json") {
        let snap = SnapshotProcess::load(std::path::Path::new(target))
            .with_context(|| format!("loading snapshot {target}"))?;
        println!(
            "{} loaded snapshot of pid {}",
            "[info]".bright_cyan(),
            snap.pid()
        );
        return Ok(Arc::new(snap));
    }

    let pid = if target.chars().all(|c| c.is_ascii_digit()) {
        target.parse::<i32>()?
    } else {
        find_process_by_name(target)
            .with_context(|| format!("no process named '{target}'"))?
    };
    println!("{} target pid={}", "[info]".bright_cyan(), pid);
    Ok(Arc::new(LiveProcess::new(pid)))
}
