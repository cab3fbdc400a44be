//! Reservation journal commands
//!
//! A reservation left in the journal means a payment neither committed nor
//! rolled back, typically after a crash or a failed rollback. Rolling it back
//! here releases the held amount.

use anyhow::{Context, Result};
use paykit_autopay::AutoPayEngine;

use crate::ui;

/// List pending reservations
pub async fn list(engine: &AutoPayEngine) -> Result<()> {
    ui::header("Pending Reservations");

    let pending = engine.ledger().pending_reservations().await?;
    if pending.is_empty() {
        ui::success("No pending reservations; the ledger is reconciled");
        return Ok(());
    }

    for record in &pending {
        ui::key_value(
            &record.id,
            &format!(
                "{} for {} since {}",
                ui::sats(record.amount_sats),
                record.peer_id,
                super::format_time(&record.created_at)
            ),
        );
    }
    ui::warning(&format!(
        "{} reservation(s) still hold spending; verify each payment before rolling back",
        pending.len()
    ));
    Ok(())
}

/// Release a pending reservation
pub async fn rollback(engine: &AutoPayEngine, id: &str, yes: bool) -> Result<()> {
    if !ui::confirm(
        &format!("Release reservation {}? Only do this if the payment did not go out", id),
        yes,
    )? {
        ui::info("Cancelled");
        return Ok(());
    }
    engine
        .ledger()
        .rollback_pending(id)
        .await
        .with_context(|| format!("Failed to roll back reservation {}", id))?;
    ui::success(&format!("Reservation {} rolled back", id));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paykit_autopay::AutoPayConfig;

    #[tokio::test]
    async fn test_rollback_releases_journaled_reservation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = AutoPayEngine::open(dir.path(), AutoPayConfig::default()).unwrap();

        let reservation = engine.ledger().reserve("pk:bob", 700).await.unwrap();
        let id = reservation.id().to_string();
        // Simulate a crash: the token is lost without commit or rollback
        drop(reservation);

        assert_eq!(engine.ledger().pending_reservations().await.unwrap().len(), 1);
        rollback(&engine, &id, true).await.unwrap();

        assert!(engine.ledger().pending_reservations().await.unwrap().is_empty());
        assert_eq!(engine.ledger().global_spend().await.unwrap().spent_sats, 0);
        assert!(rollback(&engine, &id, true).await.is_err());
    }
}
