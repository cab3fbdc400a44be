//! Auto-pay rule commands

use anyhow::{Context, Result};
use paykit_autopay::{AutoPayEngine, AutoPayRule, RuleAction};

use crate::ui;

/// Arguments for a new rule
pub struct NewRule {
    pub name: String,
    pub max_amount: Option<u64>,
    pub methods: Vec<String>,
    pub peers: Vec<String>,
    pub deny: bool,
    pub confirm: bool,
}

impl NewRule {
    fn into_rule(self) -> AutoPayRule {
        let mut rule = AutoPayRule::new(self.name)
            .with_methods(self.methods)
            .with_peers(self.peers);
        if let Some(max) = self.max_amount {
            rule = rule.with_max_amount(max);
        }
        if self.deny {
            rule = rule.deny();
        }
        if self.confirm {
            rule = rule.with_confirmation();
        }
        rule
    }
}

/// List rules in evaluation order
pub async fn list(engine: &AutoPayEngine, verbose: bool) -> Result<()> {
    ui::header("Auto-Pay Rules");

    let settings = engine.settings().load().await?;
    if settings.rules.is_empty() {
        ui::info("No rules configured; global thresholds apply");
        return Ok(());
    }

    for (position, rule) in settings.rules.iter().enumerate() {
        let action = match rule.action {
            RuleAction::Allow if rule.require_confirmation => "allow (confirm)",
            RuleAction::Allow => "allow",
            RuleAction::Deny => "deny",
        };
        let state = if rule.enabled { "" } else { " [disabled]" };
        println!("{:>3}. {} - {}{}", position, rule.name, action, state);
        ui::key_value("id", &rule.id);
        if let Some(max) = rule.max_amount_sats {
            ui::key_value("max amount", &ui::sats(max));
        }
        if verbose || !rule.allowed_peers.is_empty() {
            ui::key_value("peers", &join_or_any(&rule.allowed_peers));
        }
        if verbose || !rule.allowed_methods.is_empty() {
            ui::key_value("methods", &join_or_any(&rule.allowed_methods));
        }
    }
    Ok(())
}

fn join_or_any(set: &std::collections::BTreeSet<String>) -> String {
    if set.is_empty() {
        "any".to_string()
    } else {
        set.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Append a rule
pub async fn add(engine: &AutoPayEngine, new_rule: NewRule) -> Result<()> {
    let rule = new_rule.into_rule();
    rule.validate().context("Invalid rule")?;
    let id = rule.id.clone();

    let settings = engine.settings().upsert_rule(rule).await?;
    ui::success(&format!(
        "Rule {} added at position {}",
        id,
        settings.rules.len() - 1
    ));
    Ok(())
}

/// Remove a rule
pub async fn remove(engine: &AutoPayEngine, id: &str, yes: bool) -> Result<()> {
    if !ui::confirm(&format!("Remove rule {}?", id), yes)? {
        ui::info("Cancelled");
        return Ok(());
    }
    engine.settings().remove_rule(id).await?;
    ui::success(&format!("Rule {} removed", id));
    Ok(())
}

/// Move a rule to a new position
pub async fn move_rule(engine: &AutoPayEngine, id: &str, position: usize) -> Result<()> {
    let settings = engine.settings().move_rule(id, position).await?;
    let actual = settings
        .rules
        .iter()
        .position(|r| r.id == id)
        .unwrap_or(position);
    ui::success(&format!("Rule {} is now at position {}", id, actual));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use paykit_autopay::AutoPayConfig;

    fn new_rule(name: &str) -> NewRule {
        NewRule {
            name: name.to_string(),
            max_amount: Some(1_000),
            methods: vec![],
            peers: vec!["pk:bob".to_string()],
            deny: false,
            confirm: false,
        }
    }

    #[tokio::test]
    async fn test_add_and_reorder() {
        let engine = AutoPayEngine::in_memory(AutoPayConfig::default()).unwrap();
        add(&engine, new_rule("first")).await.unwrap();
        add(&engine, NewRule { deny: true, ..new_rule("second") }).await.unwrap();

        let settings = engine.settings().load().await.unwrap();
        let second = settings.rules[1].id.clone();
        assert_eq!(settings.rules[1].action, RuleAction::Deny);

        move_rule(&engine, &second, 0).await.unwrap();
        let settings = engine.settings().load().await.unwrap();
        assert_eq!(settings.rules[0].id, second);

        remove(&engine, &second, true).await.unwrap();
        assert_eq!(engine.settings().load().await.unwrap().rules.len(), 1);
    }
}
