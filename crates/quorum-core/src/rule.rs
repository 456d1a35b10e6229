use crate::error::RuleError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Maximum nesting depth accepted by the validator. A root leaf counts as
/// depth 1.
pub const MAX_RULE_DEPTH: usize = 10;

/// Approval policy tree. Closed variant set: evaluation and validation are
/// structural recursion over the tag, so new variants cannot be added
/// without the compiler flagging every match.
///
/// Child order of `And`/`Or` is irrelevant to evaluation but round-trips
/// through serialization for audit/display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalRule {
    /// Satisfied when at least `min_count` distinct eligible voters who are
    /// members of `group_id` hold an active approve vote naming that group.
    Group { group_id: String, min_count: u32 },
    And { rules: Vec<ApprovalRule> },
    Or { rules: Vec<ApprovalRule> },
}

impl ApprovalRule {
    pub fn group(group_id: impl Into<String>, min_count: u32) -> Self {
        Self::Group {
            group_id: group_id.into(),
            min_count,
        }
    }

    pub fn all_of(rules: Vec<ApprovalRule>) -> Self {
        Self::And { rules }
    }

    pub fn any_of(rules: Vec<ApprovalRule>) -> Self {
        Self::Or { rules }
    }

    /// Validate structural invariants. Pure and side-effect-free; run at
    /// template creation and defensively on every decode from storage.
    pub fn validate(&self) -> Result<(), RuleError> {
        self.validate_at(1)
    }

    fn validate_at(&self, depth: usize) -> Result<(), RuleError> {
        if depth > MAX_RULE_DEPTH {
            return Err(RuleError::NestingTooDeep {
                max: MAX_RULE_DEPTH,
            });
        }

        match self {
            Self::Group {
                group_id,
                min_count,
            } => {
                if *min_count < 1 {
                    return Err(RuleError::InvalidMinCount);
                }
                if group_id.trim().is_empty() {
                    return Err(RuleError::InvalidGroupId);
                }
                Ok(())
            }
            Self::And { rules } => {
                if rules.is_empty() {
                    return Err(RuleError::EmptyAnd);
                }
                for rule in rules {
                    rule.validate_at(depth + 1)?;
                }
                Ok(())
            }
            Self::Or { rules } => {
                if rules.is_empty() {
                    return Err(RuleError::EmptyOr);
                }
                for rule in rules {
                    rule.validate_at(depth + 1)?;
                }
                Ok(())
            }
        }
    }

    /// Every group id referenced anywhere in the tree, deduplicated.
    pub fn referenced_group_ids(&self) -> BTreeSet<String> {
        let mut groups = BTreeSet::new();
        self.collect_group_ids(&mut groups);
        groups
    }

    fn collect_group_ids(&self, groups: &mut BTreeSet<String>) {
        match self {
            Self::Group { group_id, .. } => {
                groups.insert(group_id.clone());
            }
            Self::And { rules } | Self::Or { rules } => {
                for rule in rules {
                    rule.collect_group_ids(groups);
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Self::Group { .. } => 1,
            Self::And { rules } | Self::Or { rules } => {
                1 + rules.iter().map(ApprovalRule::depth).max().unwrap_or(0)
            }
        }
    }

    /// Decode a rule tree persisted as JSON, distinguishing an unknown tag
    /// from otherwise undecodable content, then re-validate. Malformed
    /// stored content is an explicit error, never a silent coercion.
    pub fn from_stored_json(value: &Value) -> Result<Self, RuleError> {
        match value.get("type").and_then(Value::as_str) {
            None => {
                return Err(RuleError::MalformedContent(
                    "rule node is missing the 'type' tag".to_string(),
                ))
            }
            Some("group" | "and" | "or") => {}
            Some(other) => return Err(RuleError::InvalidRuleType(other.to_string())),
        }

        let rule: ApprovalRule = serde_json::from_value(value.clone())
            .map_err(|err| RuleError::MalformedContent(err.to_string()))?;
        rule.validate()?;
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_nested_tree_within_the_depth_cap() {
        let rule = ApprovalRule::all_of(vec![
            ApprovalRule::group("eng", 2),
            ApprovalRule::any_of(vec![
                ApprovalRule::group("legal", 1),
                ApprovalRule::group("finance", 1),
            ]),
        ]);

        assert!(rule.validate().is_ok());
        assert_eq!(rule.depth(), 3);
        assert_eq!(
            rule.referenced_group_ids().into_iter().collect::<Vec<_>>(),
            vec!["eng".to_string(), "finance".to_string(), "legal".to_string()]
        );
    }

    #[test]
    fn rejects_empty_and_or() {
        assert_eq!(
            ApprovalRule::all_of(vec![]).validate().unwrap_err().code(),
            "and_rule_must_have_rules"
        );
        assert_eq!(
            ApprovalRule::any_of(vec![]).validate().unwrap_err().code(),
            "or_rule_must_have_rules"
        );
    }

    #[test]
    fn rejects_invalid_group_leaves() {
        assert_eq!(
            ApprovalRule::group("eng", 0).validate().unwrap_err().code(),
            "group_rule_invalid_min_count"
        );
        assert_eq!(
            ApprovalRule::group("  ", 1).validate().unwrap_err().code(),
            "group_rule_invalid_group_id"
        );
    }

    #[test]
    fn rejects_nesting_beyond_the_cap() {
        let mut rule = ApprovalRule::group("eng", 1);
        for _ in 0..MAX_RULE_DEPTH {
            rule = ApprovalRule::all_of(vec![rule]);
        }

        assert_eq!(
            rule.validate().unwrap_err(),
            RuleError::NestingTooDeep {
                max: MAX_RULE_DEPTH
            }
        );
    }

    #[test]
    fn stored_json_round_trips_child_order() {
        let rule = ApprovalRule::any_of(vec![
            ApprovalRule::group("legal", 1),
            ApprovalRule::group("eng", 2),
        ]);

        let value = serde_json::to_value(&rule).unwrap();
        let decoded = ApprovalRule::from_stored_json(&value).unwrap();
        assert_eq!(decoded, rule);

        let children = value.get("rules").and_then(Value::as_array).unwrap();
        assert_eq!(
            children[0].get("group_id").and_then(Value::as_str),
            Some("legal")
        );
        assert_eq!(
            children[1].get("group_id").and_then(Value::as_str),
            Some("eng")
        );
    }

    #[test]
    fn stored_json_rejects_unknown_tags_and_missing_fields() {
        let err =
            ApprovalRule::from_stored_json(&serde_json::json!({ "type": "xor", "rules": [] }))
                .unwrap_err();
        assert_eq!(err.code(), "invalid_rule_type");

        let err = ApprovalRule::from_stored_json(&serde_json::json!({ "group_id": "eng" }))
            .unwrap_err();
        assert_eq!(err.code(), "malformed_content");

        let err = ApprovalRule::from_stored_json(&serde_json::json!({ "type": "group" }))
            .unwrap_err();
        assert_eq!(err.code(), "malformed_content");
    }
}
