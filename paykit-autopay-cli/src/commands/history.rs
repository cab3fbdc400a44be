//! Auto-pay history commands

use anyhow::Result;
use paykit_autopay::{AutoPayEngine, AutoPayOutcome};

use crate::ui;

fn outcome_label(outcome: AutoPayOutcome) -> &'static str {
    match outcome {
        AutoPayOutcome::AutoPaid => "auto-paid",
        AutoPayOutcome::UserApproved => "paid after approval",
        AutoPayOutcome::Denied => "denied",
        AutoPayOutcome::NeedsApproval => "needs approval",
        AutoPayOutcome::Failed => "failed",
        AutoPayOutcome::Expired => "expired",
        AutoPayOutcome::UserDeclined => "declined",
    }
}

/// Show recent auto-pay decisions
pub async fn show(engine: &AutoPayEngine, limit: usize) -> Result<()> {
    ui::header("Auto-Pay History");

    let entries = engine.history().entries().await?;
    if entries.is_empty() {
        ui::info("No auto-pay activity yet");
        return Ok(());
    }

    for entry in entries.iter().take(limit) {
        let rule = entry
            .rule_id
            .as_deref()
            .map(|id| format!(" [rule {}]", id))
            .unwrap_or_default();
        println!(
            "{}  {:<20} {:>16} via {:<10} {}{}",
            super::format_time(&entry.timestamp),
            entry.peer_id,
            ui::sats(entry.amount_sats),
            entry.method_id,
            outcome_label(entry.outcome),
            rule
        );
    }
    if entries.len() > limit {
        ui::info(&format!("{} older entries not shown", entries.len() - limit));
    }
    Ok(())
}

/// Clear auto-pay history
pub async fn clear(engine: &AutoPayEngine, yes: bool) -> Result<()> {
    if !ui::confirm("Clear all auto-pay history?", yes)? {
        ui::info("Cancelled");
        return Ok(());
    }
    engine.history().clear().await?;
    ui::success("Auto-pay history cleared");
    Ok(())
}
