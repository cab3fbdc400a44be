//! Spending limit commands

use anyhow::Result;
use paykit_autopay::{AutoPayEngine, PeerLimit, SpendingPeriod};

use crate::ui;

fn print_limit(limit: &PeerLimit) {
    ui::key_value(
        &limit.peer_id,
        &format!(
            "{} of {} per {} ({:.0}%)",
            ui::sats(limit.spent_sats),
            ui::sats(limit.limit_sats),
            limit.period,
            limit.usage_percent()
        ),
    );
}

/// List all peer limits
pub async fn list(engine: &AutoPayEngine) -> Result<()> {
    ui::header("Peer Spending Limits");

    let limits = engine.ledger().list_peer_limits().await?;
    if limits.is_empty() {
        ui::info("No peer limits yet; new peers get the configured default");
        ui::key_value(
            "Default",
            &format!(
                "{} per {}",
                ui::sats(engine.config().ledger.default_peer_limit_sats),
                engine.config().ledger.default_period
            ),
        );
        return Ok(());
    }
    for limit in &limits {
        print_limit(limit);
    }
    Ok(())
}

/// Show one peer's limit
pub async fn show(engine: &AutoPayEngine, peer: &str) -> Result<()> {
    ui::header(&format!("Spending Limit for {}", peer));

    let limit = engine.ledger().peer_limit(peer).await?;
    print_limit(&limit);
    ui::key_value("Remaining", &ui::sats(limit.remaining_sats()));
    ui::key_value("Period started", &super::format_time(&limit.last_reset_at));
    Ok(())
}

/// Set a peer's limit
pub async fn set(engine: &AutoPayEngine, peer: &str, limit: u64, period: &str) -> Result<()> {
    let period: SpendingPeriod = period.parse()?;
    let updated = engine.ledger().set_peer_limit(peer, limit, period).await?;

    ui::success(&format!("Limit for {} updated", peer));
    print_limit(&updated);
    if updated.spent_sats > updated.limit_sats {
        ui::warning("Already spent more than the new limit in this period");
    }
    Ok(())
}

/// Check whether an amount would fit
pub async fn check(engine: &AutoPayEngine, peer: &str, amount: u64) -> Result<()> {
    ui::header("Spending Check");

    let check = engine.ledger().check(peer, amount).await?;
    ui::key_value("Amount", &ui::sats(amount));
    ui::key_value("Peer remaining", &ui::sats(check.peer_remaining_sats));
    ui::key_value("Global remaining", &ui::sats(check.global_remaining_sats));
    ui::separator();

    match check.exceeded_scope {
        Some(scope) => ui::warning(&format!("Would exceed the {} limit", scope)),
        None => ui::success("Fits within both limits"),
    }
    Ok(())
}
