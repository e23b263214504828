//! homeglance - terminal host for the Home Assistant state repository
//!
//! Logs in, lists cached states, groups and services, and manages the
//! entities shown on a companion watch.

mod cli;
mod commands;
mod config;
mod output;

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};
use crate::config::RuntimeContext;

fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = writeln!(io::stderr(), "Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let ctx = RuntimeContext::new(&cli.global)?;
    ctx.init_logging()?;

    log::debug!("Config loaded from: {:?}", ctx.config_path());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_command(&ctx, cli.command))
}

async fn run_command(ctx: &RuntimeContext, command: Command) -> Result<()> {
    match command {
        Command::Status => commands::session::status(ctx).await,
        Command::Login { url, with_password } => {
            commands::session::login(ctx, &url, with_password.as_deref()).await
        }
        Command::Logout => commands::session::logout(ctx),
        Command::States { filter } => commands::entity::states(ctx, filter).await,
        Command::Services { domain } => commands::service::list(ctx, domain.as_deref()).await,
        Command::Groups { scenes } => commands::entity::groups(ctx, scenes).await,
        Command::History { entity_id } => commands::entity::history(ctx, entity_id.as_deref()).await,
        Command::Call {
            domain,
            service,
            entity_id,
        } => commands::service::call(ctx, &domain, &service, &entity_id).await,
        Command::Watch { slot, command } => commands::watch::run(ctx, slot, command).await,
        Command::Config { command } => commands::config::run(ctx, command),
        Command::Completions { shell } => commands::completions::run(shell),
    }
}
