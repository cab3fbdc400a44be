//! Dry-run policy evaluation

use anyhow::Result;
use paykit_autopay::{AutoPayEngine, Decision, PolicyEngine};

use crate::ui;

/// Show what the policy would decide, and whether the limits would allow it
pub async fn run(
    engine: &AutoPayEngine,
    peer: &str,
    amount: u64,
    method: &str,
    json: bool,
) -> Result<()> {
    if json {
        let settings = engine.settings().load_or_default().await;
        let decision = PolicyEngine::new(settings).evaluate_payment(amount, method, peer);
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }

    ui::header("Policy Evaluation");
    ui::key_value("Peer", peer);
    ui::key_value("Amount", &ui::sats(amount));
    ui::key_value("Method", method);
    ui::separator();

    let settings = engine.settings().load_or_default().await;
    let decision = PolicyEngine::new(settings).evaluate_payment(amount, method, peer);

    match &decision {
        Decision::Approved { rule_id } => {
            match rule_id {
                Some(id) => ui::success(&format!("Approved by rule {}", id)),
                None => ui::success("Approved by global thresholds"),
            }
            let check = engine.ledger().check(peer, amount).await?;
            if let Some(scope) = check.exceeded_scope {
                ui::warning(&format!(
                    "The {} limit is exhausted; the payment would be handed to the user",
                    scope
                ));
            }
        }
        Decision::Denied { rule_id } => ui::warning(&format!("Denied by rule {}", rule_id)),
        Decision::RequiresApproval { reason } => {
            ui::info(&format!("Requires approval: {}", reason))
        }
    }
    Ok(())
}
