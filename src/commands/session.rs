//! Session commands: status, login, logout

use std::time::Duration;

use anyhow::{bail, Result};
use serde::Serialize;
use tabled::Tabled;

use homeglance::repository::SlotStatus;
use homeglance::CacheStatus;

use crate::config::RuntimeContext;
use crate::output::{output_for_format, print_table};

#[derive(Debug, Serialize)]
struct StatusReport {
    server: Option<String>,
    logged_in: bool,
    api_available: bool,
    cache: CacheStatus,
}

#[derive(Tabled)]
struct CacheRow {
    #[tabled(rename = "Type")]
    cache_type: &'static str,
    #[tabled(rename = "Items")]
    items: usize,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Expires In")]
    expires: String,
    #[tabled(rename = "TTL")]
    ttl: String,
}

impl CacheRow {
    fn new(cache_type: &'static str, slot: &SlotStatus) -> Self {
        Self {
            cache_type,
            items: slot.count,
            age: slot
                .age_secs
                .map(format_secs)
                .unwrap_or_else(|| "never".to_string()),
            expires: slot
                .expires_in_secs
                .map(format_secs)
                .unwrap_or_else(|| "expired".to_string()),
            ttl: format_secs(slot.ttl_secs),
        }
    }
}

pub async fn status(ctx: &RuntimeContext) -> Result<()> {
    let repository = ctx.repository()?;
    let api_available = repository.api_available().await;

    // Warm both caches so the report shows what a client would see
    if api_available {
        let (states, services) = tokio::join!(repository.get_states(), repository.get_services());
        log::debug!(
            "Fetched {} states and {} service domains",
            states.len(),
            services.len()
        );
    }

    let report = StatusReport {
        server: repository.base_url(),
        logged_in: repository.is_logged_in(),
        api_available,
        cache: repository.cache_status(),
    };

    output_for_format(ctx, &report, || {
        println!("Server:        {}", report.server.as_deref().unwrap_or("(none)"));
        println!("Logged in:     {}", yes_no(report.logged_in));
        println!("API available: {}", yes_no(report.api_available));
        println!();
        print_table(
            ctx,
            &[
                CacheRow::new("States", &report.cache.states),
                CacheRow::new("Services", &report.cache.services),
            ],
        )
    })
}

pub async fn login(ctx: &RuntimeContext, url: &str, password: Option<&str>) -> Result<()> {
    let Some(password) = password.or(ctx.password()) else {
        bail!("No password given. Use --with-password or set HASS_PASSWORD");
    };

    let repository = ctx.repository()?;
    if repository.login(url, password).await {
        if !ctx.global.quiet {
            println!("Logged in to {url}");
        }
        Ok(())
    } else {
        bail!("Could not reach the API at {url} with the given password")
    }
}

pub fn logout(ctx: &RuntimeContext) -> Result<()> {
    let repository = ctx.repository()?;
    let was_logged_in = repository.is_logged_in();
    repository.logout();
    if !ctx.global.quiet {
        if was_logged_in {
            println!("Logged out");
        } else {
            println!("Not logged in");
        }
    }
    Ok(())
}

fn format_secs(secs: u64) -> String {
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
