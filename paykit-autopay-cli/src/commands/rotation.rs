//! Endpoint rotation policy commands
//!
//! Rotation replaces a receiving endpoint after it has been paid, so that
//! observers cannot link payments through address reuse.

use anyhow::Result;
use paykit_autopay::{AutoPayEngine, MethodRotationSettings, RotationPolicy};

use crate::ui;

fn format_policy(settings: &MethodRotationSettings) -> String {
    match settings.policy {
        RotationPolicy::AfterUses => format!("after {} uses", settings.threshold),
        policy => policy.to_string(),
    }
}

/// Show rotation status for all methods
pub async fn status(engine: &AutoPayEngine, verbose: bool) -> Result<()> {
    ui::header("Endpoint Rotation Status");

    let rotation = engine.rotation();
    let config = rotation.config().await?;
    ui::key_value("Default policy", config.default_policy.as_str());
    ui::key_value("Default threshold", &config.default_threshold.to_string());
    ui::key_value(
        "Auto-rotate on payment",
        if config.auto_rotate_enabled {
            "enabled"
        } else {
            "disabled"
        },
    );
    ui::separator();

    let methods = rotation.list_methods().await?;
    if methods.is_empty() {
        ui::info("No methods used or configured yet");
        return Ok(());
    }

    for method in &methods {
        let last = method
            .last_rotated_at
            .as_ref()
            .map(super::format_time)
            .unwrap_or_else(|| "never".to_string());
        ui::key_value(
            &method.method_id,
            &format!(
                "{}, {} rotations, last: {}",
                format_policy(method),
                method.rotation_count,
                last
            ),
        );
        if verbose {
            ui::info(&format!("    Uses since last rotation: {}", method.use_count));
        }
    }
    ui::separator();
    ui::key_value("Total rotations", &rotation.total_rotations().await?.to_string());
    Ok(())
}

/// Set the rotation policy for a method
pub async fn set_policy(
    engine: &AutoPayEngine,
    method: &str,
    policy: &str,
    threshold: u32,
) -> Result<()> {
    ui::header("Set Rotation Policy");

    let policy: RotationPolicy = policy.parse()?;
    let settings = engine
        .rotation()
        .update_method_settings(method, policy, threshold)
        .await?;

    ui::key_value("Method", method);
    ui::key_value("New policy", &format_policy(&settings));
    ui::success("Policy updated successfully");
    Ok(())
}

/// Enable or disable auto-rotation
pub async fn auto_rotate(engine: &AutoPayEngine, enable: bool) -> Result<()> {
    let rotation = engine.rotation();
    let mut config = rotation.config().await?;
    config.auto_rotate_enabled = enable;
    rotation.set_config(&config).await?;

    if enable {
        ui::success("Auto-rotation enabled");
    } else {
        ui::success("Auto-rotation disabled; uses are still counted");
    }
    Ok(())
}

/// Show rotation history
pub async fn history(engine: &AutoPayEngine, method: Option<&str>) -> Result<()> {
    ui::header("Rotation History");

    let events: Vec<_> = engine
        .rotation()
        .history()
        .await?
        .into_iter()
        .filter(|event| method.map_or(true, |m| event.method_id == m))
        .collect();

    if events.is_empty() {
        ui::info("No rotations recorded");
        return Ok(());
    }
    for event in &events {
        println!(
            "{}  {:<12} {}",
            super::format_time(&event.timestamp),
            event.method_id,
            event.reason
        );
    }
    Ok(())
}

/// Clear rotation history
pub async fn clear_history(engine: &AutoPayEngine, yes: bool) -> Result<()> {
    if !ui::confirm("Clear all rotation history?", yes)? {
        ui::info("Cancelled");
        return Ok(());
    }
    engine.rotation().clear_history().await?;
    ui::success("Rotation history cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paykit_autopay::AutoPayConfig;

    #[tokio::test]
    async fn test_set_policy_and_auto_rotate() {
        let engine = AutoPayEngine::in_memory(AutoPayConfig::default()).unwrap();

        set_policy(&engine, "onchain", "after-uses", 3).await.unwrap();
        let settings = engine.rotation().method_settings("onchain").await.unwrap();
        assert_eq!(settings.policy, RotationPolicy::AfterUses);
        assert_eq!(format_policy(&settings), "after 3 uses");

        assert!(set_policy(&engine, "onchain", "sometimes", 3).await.is_err());

        auto_rotate(&engine, false).await.unwrap();
        assert!(!engine.rotation().config().await.unwrap().auto_rotate_enabled);
    }
}
