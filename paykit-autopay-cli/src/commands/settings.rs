//! Global settings commands

use anyhow::Result;
use paykit_autopay::AutoPayEngine;

use crate::ui;

/// Show current settings
pub async fn show(engine: &AutoPayEngine) -> Result<()> {
    ui::header("Auto-Pay Settings");

    let settings = engine.settings().load().await?;
    ui::key_value("Identity", &engine.config().identity);
    ui::key_value(
        "Auto-pay",
        if settings.autopay_enabled {
            "enabled"
        } else {
            "disabled"
        },
    );
    ui::key_value("Global max amount", &ui::sats(settings.global_max_amount_sats));
    ui::key_value("Global daily limit", &ui::sats(settings.global_daily_limit_sats));
    ui::key_value(
        "Confirm above",
        &ui::sats(settings.require_confirmation_above_sats),
    );
    ui::key_value("Rules", &settings.rules.len().to_string());

    let spend = engine.ledger().global_spend().await?;
    ui::separator();
    ui::key_value(
        "Spent today",
        &format!(
            "{} of {}",
            ui::sats(spend.spent_sats),
            ui::sats(settings.global_daily_limit_sats)
        ),
    );
    Ok(())
}

/// Turn auto-pay on or off
pub async fn set_enabled(engine: &AutoPayEngine, enabled: bool) -> Result<()> {
    engine.settings().set_enabled(enabled).await?;
    if enabled {
        ui::success("Auto-pay enabled");
    } else {
        ui::success("Auto-pay disabled; every payment will ask for approval");
    }
    Ok(())
}

/// Change global thresholds
pub async fn set(
    engine: &AutoPayEngine,
    max_amount: Option<u64>,
    daily_limit: Option<u64>,
    confirm_above: Option<u64>,
) -> Result<()> {
    if max_amount.is_none() && daily_limit.is_none() && confirm_above.is_none() {
        ui::warning("Nothing to change; pass --max-amount, --daily-limit or --confirm-above");
        return Ok(());
    }

    let mut settings = engine.settings().load().await?;
    if let Some(sats) = max_amount {
        settings = settings.with_global_max_amount(sats);
        ui::key_value("Global max amount", &ui::sats(sats));
    }
    if let Some(sats) = daily_limit {
        settings = settings.with_global_daily_limit(sats);
        ui::key_value("Global daily limit", &ui::sats(sats));
    }
    if let Some(sats) = confirm_above {
        settings = settings.with_confirmation_above(sats);
        ui::key_value("Confirm above", &ui::sats(sats));
    }
    engine.settings().save(&settings).await?;

    ui::success("Settings updated");
    Ok(())
}
