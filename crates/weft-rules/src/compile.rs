//! Rule validation and transformer compilation.
//!
//! A rule is validated and compiled exactly once per mutation; dispatch-time
//! evaluation only walks the compiled trees.

use chrono::{DateTime, Duration, Utc};

use weft_core::RuleId;
use weft_core::pattern::EventPattern;
use weft_router::{CompiledTransformer, Condition, MappingTemplate};

use crate::errors::{Result, RuleError};
use crate::types::{RoutingRule, RuleSpec};

/// Validate a creation spec into a full rule record.
///
/// Checks pattern syntax, the verbatim self-cycle guard, and TTL positivity;
/// compiles condition and mapping so malformed rules are rejected before any
/// state changes.
pub fn validate_spec(spec: &RuleSpec, created_by: &str, now: DateTime<Utc>) -> Result<RoutingRule> {
    let source_pattern = EventPattern::parse(&spec.source_pattern)
        .map_err(|e| RuleError::InvalidPattern(e.to_string()))?;

    validate_target(&spec.target_event)?;

    // Best-effort cycle guard: a rule whose source matches its own target
    // verbatim would re-trigger itself on every firing. Deeper cycles are
    // bounded by the router's depth limit.
    if source_pattern.matches(&spec.target_event) {
        return Err(RuleError::SelfCycle(spec.rule_id.clone()));
    }

    let expires_at = match spec.ttl_secs {
        None => None,
        Some(0) => return Err(RuleError::TtlInvalid("ttl must be positive".to_string())),
        Some(secs) => Some(
            now + Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)),
        ),
    };

    let rule = RoutingRule {
        rule_id: RuleId::from(spec.rule_id.as_str()),
        source_pattern,
        target_event: spec.target_event.clone(),
        condition: spec.condition.clone(),
        mapping: spec.mapping.clone(),
        priority: spec.priority,
        ttl_secs: spec.ttl_secs,
        expires_at,
        async_spec: spec.async_spec.clone(),
        created_at: now,
        created_by: created_by.to_string(),
    };

    // Compile once here so rejection happens before any state mutates.
    let _ = compile_rule(&rule)?;
    Ok(rule)
}

/// Compile a rule into its live transformer registration.
pub fn compile_rule(rule: &RoutingRule) -> Result<CompiledTransformer> {
    let condition = rule.condition.as_ref().map(Condition::parse).transpose()?;
    let mapping = MappingTemplate::compile(&rule.mapping)?;
    Ok(CompiledTransformer {
        rule_id: rule.rule_id.clone(),
        source: rule.source_pattern.clone(),
        target_event: rule.target_event.clone(),
        condition,
        mapping,
        priority: rule.priority,
        expires_at: rule.expires_at,
        async_spec: rule.async_spec.clone(),
    })
}

pub(crate) fn validate_target(target_event: &str) -> Result<()> {
    if target_event.is_empty() || target_event.contains('*') {
        return Err(RuleError::InvalidPattern(format!(
            "target event must be a concrete name: '{target_event}'"
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_spec(rule_id: &str, source: &str, target: &str) -> RuleSpec {
        RuleSpec {
            rule_id: rule_id.to_string(),
            source_pattern: source.to_string(),
            target_event: target.to_string(),
            condition: None,
            mapping: serde_json::json!({"id": "{{order_id}}"}),
            priority: 0,
            ttl_secs: None,
            async_spec: None,
        }
    }

    #[test]
    fn valid_spec_compiles() {
        let rule = validate_spec(&make_spec("r1", "order:*", "audit:log"), "system", Utc::now())
            .unwrap();
        assert_eq!(rule.rule_id.as_str(), "r1");
        assert!(rule.expires_at.is_none());
        assert!(compile_rule(&rule).is_ok());
    }

    #[test]
    fn ttl_materializes_expires_at() {
        let now = Utc::now();
        let rule = validate_spec(
            &RuleSpec {
                ttl_secs: Some(60),
                ..make_spec("r1", "order:*", "audit:log")
            },
            "system",
            now,
        )
        .unwrap();
        assert_eq!(rule.expires_at, Some(now + Duration::seconds(60)));
    }

    #[test]
    fn zero_ttl_rejected() {
        let err = validate_spec(
            &RuleSpec {
                ttl_secs: Some(0),
                ..make_spec("r1", "order:*", "audit:log")
            },
            "system",
            Utc::now(),
        )
        .unwrap_err();
        assert_matches!(err, RuleError::TtlInvalid(_));
    }

    #[test]
    fn bad_source_pattern_rejected() {
        let err = validate_spec(
            &make_spec("r1", "or*der", "audit:log"),
            "system",
            Utc::now(),
        )
        .unwrap_err();
        assert_matches!(err, RuleError::InvalidPattern(_));
    }

    #[test]
    fn wildcard_target_rejected() {
        let err = validate_spec(
            &make_spec("r1", "order:*", "audit:*"),
            "system",
            Utc::now(),
        )
        .unwrap_err();
        assert_matches!(err, RuleError::InvalidPattern(_));
    }

    #[test]
    fn self_cycle_rejected() {
        // Exact self-match
        let err = validate_spec(
            &make_spec("r1", "audit:log", "audit:log"),
            "system",
            Utc::now(),
        )
        .unwrap_err();
        assert_matches!(err, RuleError::SelfCycle(_));

        // Wildcard source matching its own target
        let err = validate_spec(
            &make_spec("r2", "audit:*", "audit:log"),
            "system",
            Utc::now(),
        )
        .unwrap_err();
        assert_matches!(err, RuleError::SelfCycle(_));
    }

    #[test]
    fn bad_condition_rejected() {
        let err = validate_spec(
            &RuleSpec {
                condition: Some(serde_json::json!({"field": "x", "op": "matches", "value": 1})),
                ..make_spec("r1", "order:*", "audit:log")
            },
            "system",
            Utc::now(),
        )
        .unwrap_err();
        assert_matches!(err, RuleError::Condition(_));
    }

    #[test]
    fn bad_mapping_rejected() {
        let err = validate_spec(
            &RuleSpec {
                mapping: serde_json::json!({"x": "{{$rand()}}"}),
                ..make_spec("r1", "order:*", "audit:log")
            },
            "system",
            Utc::now(),
        )
        .unwrap_err();
        assert_matches!(err, RuleError::Template(_));
    }
}
