//! Service command implementations

use anyhow::{bail, Result};
use serde::Serialize;
use tabled::Tabled;

use crate::config::RuntimeContext;
use crate::output::{output_for_format, print_table, truncate};

#[derive(Debug, Tabled, Serialize)]
struct ServiceRow {
    domain: String,
    service: String,
    description: String,
}

pub async fn list(ctx: &RuntimeContext, domain_filter: Option<&str>) -> Result<()> {
    let repository = ctx.repository()?;
    let services = repository.get_services().await;

    let filtered: Vec<_> = if let Some(filter) = domain_filter {
        services
            .iter()
            .filter(|s| s.domain.contains(filter))
            .collect()
    } else {
        services.iter().collect()
    };

    output_for_format(ctx, &filtered, || {
        let rows: Vec<ServiceRow> = filtered
            .iter()
            .flat_map(|domain| {
                domain.methods.iter().map(|(name, method)| ServiceRow {
                    domain: domain.domain.clone(),
                    service: name.clone(),
                    description: truncate(&method.description, 50),
                })
            })
            .collect();

        if rows.is_empty() {
            if domain_filter.is_some() {
                println!("No services found matching filter");
            } else {
                println!("No services found");
            }
        } else {
            print_table(ctx, &rows)?;
        }
        Ok(())
    })
}

pub async fn call(ctx: &RuntimeContext, domain: &str, service: &str, entity_id: &str) -> Result<()> {
    let repository = ctx.repository()?;
    if !repository.is_logged_in() {
        bail!("Not logged in. Run 'homeglance login <url>' first");
    }

    let changed = repository.update_service(domain, service, entity_id).await?;

    output_for_format(ctx, &changed, || {
        println!("Service {domain}.{service} called on {entity_id}");
        if !changed.is_empty() {
            println!("Affected entities:");
            for state in &changed {
                println!("  {} -> {}", state.entity_id, state.state);
            }
        }
        Ok(())
    })
}
