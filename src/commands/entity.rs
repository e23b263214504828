//! Entity command implementations: states, groups, history

use anyhow::Result;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::Serialize;
use tabled::Tabled;

use homeglance::State;

use crate::config::RuntimeContext;
use crate::output::{output_for_format, print_table, truncate};

#[derive(Debug, Tabled, Serialize)]
struct EntityRow {
    entity_id: String,
    state: String,
    #[tabled(rename = "friendly_name")]
    friendly_name: String,
    last_changed: String,
}

impl From<&State> for EntityRow {
    fn from(state: &State) -> Self {
        Self {
            entity_id: state.entity_id.clone(),
            state: state.state.clone(),
            friendly_name: state.friendly_name().unwrap_or("").to_string(),
            last_changed: state.last_changed.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Tabled)]
struct GroupRow {
    group: String,
    name: String,
    members: usize,
    entities: String,
}

pub async fn states(ctx: &RuntimeContext, filter: Option<String>) -> Result<()> {
    let repository = ctx.repository()?;
    let states = repository.get_states().await;
    let filtered = filter_states(&states, filter.as_deref());

    output_for_format(ctx, &filtered, || {
        let rows: Vec<EntityRow> = filtered.iter().map(|s| EntityRow::from(*s)).collect();
        if rows.is_empty() {
            if !repository.is_logged_in() {
                println!("Not logged in. Run 'homeglance login <url>' first");
            } else if filter.is_some() {
                println!("No entities found matching filter");
            } else {
                println!("No entities found");
            }
        } else {
            print_table(ctx, &rows)?;
        }
        Ok(())
    })
}

pub async fn groups(ctx: &RuntimeContext, include_scenes: bool) -> Result<()> {
    let repository = ctx.repository()?;
    let (_, groups) = repository.get_groups(include_scenes).await;

    output_for_format(ctx, &groups, || {
        let rows: Vec<GroupRow> = groups
            .iter()
            .map(|group| GroupRow {
                group: group.entity.entity_id.clone(),
                name: group.name().to_string(),
                members: group.members.len(),
                entities: truncate(
                    &group
                        .members
                        .iter()
                        .map(|m| m.entity_id.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    60,
                ),
            })
            .collect();

        if rows.is_empty() {
            println!("No groups found");
        } else {
            print_table(ctx, &rows)?;
        }
        Ok(())
    })
}

pub async fn history(ctx: &RuntimeContext, entity_id: Option<&str>) -> Result<()> {
    let repository = ctx.repository()?;
    let history = repository.get_history(entity_id).await;

    output_for_format(ctx, &history, || {
        let rows: Vec<EntityRow> = history.iter().flatten().map(EntityRow::from).collect();
        if rows.is_empty() {
            match entity_id {
                Some(id) => println!("No history found for {id} today"),
                None => println!("No history found today"),
            }
        } else {
            print_table(ctx, &rows)?;
        }
        Ok(())
    })
}

/// Fuzzy-match entities by id or friendly name
fn filter_states<'a>(states: &'a [State], filter: Option<&str>) -> Vec<&'a State> {
    let Some(filter) = filter else {
        return states.iter().collect();
    };

    let matcher = SkimMatcherV2::default();
    states
        .iter()
        .filter(|s| {
            matcher.fuzzy_match(&s.entity_id, filter).is_some()
                || s
                    .friendly_name()
                    .is_some_and(|name| matcher.fuzzy_match(name, filter).is_some())
        })
        .collect()
}
