//! Watch entity commands

use anyhow::Result;
use serde::Serialize;

use homeglance::{HassClient, Repository, State};

use crate::cli::{WatchCommand, WatchSlot};
use crate::config::RuntimeContext;
use crate::output::output_for_format;

#[derive(Debug, Serialize)]
struct WatchEntity {
    slot: &'static str,
    entity_id: Option<String>,
    state: Option<State>,
}

pub async fn run(ctx: &RuntimeContext, slot: WatchSlot, command: Option<WatchCommand>) -> Result<()> {
    let repository = ctx.repository()?;
    match command.unwrap_or(WatchCommand::Show) {
        WatchCommand::Show => show(ctx, &repository, slot).await,
        WatchCommand::Set { entity_id } => {
            set(&repository, slot, Some(&entity_id))?;
            if !ctx.global.quiet {
                println!("Watch {} set to {entity_id}", slot_name(slot));
            }
            Ok(())
        }
        WatchCommand::Clear => {
            set(&repository, slot, None)?;
            if !ctx.global.quiet {
                println!("Watch {} cleared", slot_name(slot));
            }
            Ok(())
        }
    }
}

async fn show(ctx: &RuntimeContext, repository: &Repository<HassClient>, slot: WatchSlot) -> Result<()> {
    let (entity_id, state) = match slot {
        WatchSlot::Glance => (
            repository.watch_glance_entity_id(),
            repository.get_watch_glance_entity().await,
        ),
        WatchSlot::Complication => (
            repository.watch_complication_entity_id(),
            repository.get_watch_complication_entity().await,
        ),
    };

    let entity = WatchEntity {
        slot: slot_name(slot),
        entity_id,
        state,
    };

    output_for_format(ctx, &entity, || {
        match (&entity.entity_id, &entity.state) {
            (None, _) => println!("No {} entity chosen", entity.slot),
            (Some(id), None) => println!("{id}: not available"),
            (Some(id), Some(state)) => match state.friendly_name() {
                Some(name) => println!("{name} ({id}): {}", state.state),
                None => println!("{id}: {}", state.state),
            },
        }
        Ok(())
    })
}

fn set(repository: &Repository<HassClient>, slot: WatchSlot, entity_id: Option<&str>) -> Result<()> {
    match slot {
        WatchSlot::Glance => repository.set_watch_glance_entity_id(entity_id),
        WatchSlot::Complication => repository.set_watch_complication_entity_id(entity_id),
    }
}

fn slot_name(slot: WatchSlot) -> &'static str {
    match slot {
        WatchSlot::Glance => "glance",
        WatchSlot::Complication => "complication",
    }
}
