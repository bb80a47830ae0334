// =============================================================================
// Condition Router (C10)
// =============================================================================
//
// Rule engine evaluating typed predicates against a signal's enriched
// context, combined into AND/OR rule trees.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::{RouteAction, RoutingDecision};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Field {
    Volatility,
    Confidence,
    SymbolClass,
    Provider,
    Session,
    Spread,
    MarginLevel,
    Volume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: Field,
    pub op: Op,
    pub value: FieldValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combinator {
    And,
    Or,
}

/// Context gathered from C2/C6/C8 used to evaluate a rule's conditions.
#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    pub volatility: Option<f64>,
    pub confidence: Option<f64>,
    pub symbol_class: Option<String>,
    pub provider: Option<String>,
    pub session: Option<String>,
    pub spread_pips: Option<f64>,
    pub margin_level: Option<f64>,
    pub volume: Option<f64>,
}

impl RoutingContext {
    fn numeric(&self, field: Field) -> Option<f64> {
        match field {
            Field::Volatility => self.volatility,
            Field::Confidence => self.confidence,
            Field::Spread => self.spread_pips,
            Field::MarginLevel => self.margin_level,
            Field::Volume => self.volume,
            _ => None,
        }
    }

    fn textual(&self, field: Field) -> Option<&str> {
        match field {
            Field::SymbolClass => self.symbol_class.as_deref(),
            Field::Provider => self.provider.as_deref(),
            Field::Session => self.session.as_deref(),
            _ => None,
        }
    }
}

fn eval_condition(cond: &Condition, ctx: &RoutingContext) -> bool {
    match (&cond.value, cond.op) {
        (FieldValue::Number(target), op) => match ctx.numeric(cond.field) {
            Some(actual) => match op {
                Op::Eq => (actual - target).abs() < f64::EPSILON,
                Op::Ne => (actual - target).abs() >= f64::EPSILON,
                Op::Lt => actual < *target,
                Op::Le => actual <= *target,
                Op::Gt => actual > *target,
                Op::Ge => actual >= *target,
                _ => false,
            },
            None => false,
        },
        (FieldValue::Text(target), op) => match ctx.textual(cond.field) {
            Some(actual) => match op {
                Op::Eq => actual == target,
                Op::Ne => actual != target,
                _ => false,
            },
            None => false,
        },
        (FieldValue::List(list), op) => match ctx.textual(cond.field) {
            Some(actual) => match op {
                Op::In => list.iter().any(|v| v == actual),
                Op::NotIn => !list.iter().any(|v| v == actual),
                _ => false,
            },
            None => false,
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub rule_id: String,
    pub conditions: Vec<Condition>,
    pub combinator: Combinator,
    pub action: RouteAction,
}

impl RouteRule {
    fn matches(&self, ctx: &RoutingContext) -> Option<Vec<String>> {
        if self.conditions.is_empty() {
            return Some(vec![]);
        }
        let results: Vec<bool> = self.conditions.iter().map(|c| eval_condition(c, ctx)).collect();
        let matched = match self.combinator {
            Combinator::And => results.iter().all(|r| *r),
            Combinator::Or => results.iter().any(|r| *r),
        };
        if matched {
            Some(
                self.conditions
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| results[*i])
                    .map(|(i, _)| format!("{:?}", self.conditions[i].field).to_lowercase() + &i.to_string())
                    .collect(),
            )
        } else {
            None
        }
    }
}

pub struct ConditionRouter {
    rules: Vec<RouteRule>,
    default_action: RouteAction,
}

impl ConditionRouter {
    pub fn new(rules: Vec<RouteRule>, default_action: RouteAction) -> Self {
        Self { rules, default_action }
    }

    pub fn route(&self, signal_id: &str, ctx: &RoutingContext) -> RoutingDecision {
        for rule in &self.rules {
            if let Some(conditions_met) = rule.matches(ctx) {
                return RoutingDecision {
                    signal_id: signal_id.to_string(),
                    matched_rule_id: Some(rule.rule_id.clone()),
                    action: rule.action.clone(),
                    conditions_met,
                    model_version: None,
                };
            }
        }
        RoutingDecision {
            signal_id: signal_id.to_string(),
            matched_rule_id: None,
            action: self.default_action.clone(),
            conditions_met: vec![],
            model_version: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![
            RouteRule {
                rule_id: "high-vol".to_string(),
                conditions: vec![Condition {
                    field: Field::Volatility,
                    op: Op::Ge,
                    value: FieldValue::Number(0.8),
                }],
                combinator: Combinator::And,
                action: RouteAction::RouteToReverse,
            },
            RouteRule {
                rule_id: "catch-all".to_string(),
                conditions: vec![],
                combinator: Combinator::And,
                action: RouteAction::ProcessNormal,
            },
        ];
        let router = ConditionRouter::new(rules, RouteAction::ProcessNormal);
        let ctx = RoutingContext {
            volatility: Some(0.9),
            ..Default::default()
        };
        let decision = router.route("s1", &ctx);
        assert!(matches!(decision.action, RouteAction::RouteToReverse));
        assert_eq!(decision.matched_rule_id, Some("high-vol".to_string()));
    }

    #[test]
    fn falls_back_to_default_when_nothing_matches() {
        let rules = vec![RouteRule {
            rule_id: "never".to_string(),
            conditions: vec![Condition {
                field: Field::Confidence,
                op: Op::Gt,
                value: FieldValue::Number(2.0),
            }],
            combinator: Combinator::And,
            action: RouteAction::BlockSignal { reason: "x".to_string() },
        }];
        let router = ConditionRouter::new(rules, RouteAction::ProcessNormal);
        let decision = router.route("s1", &RoutingContext::default());
        assert!(matches!(decision.action, RouteAction::ProcessNormal));
        assert!(decision.matched_rule_id.is_none());
    }

    #[test]
    fn or_combinator_matches_on_any_condition() {
        let rules = vec![RouteRule {
            rule_id: "r1".to_string(),
            conditions: vec![
                Condition { field: Field::Confidence, op: Op::Gt, value: FieldValue::Number(0.9) },
                Condition { field: Field::Spread, op: Op::Gt, value: FieldValue::Number(5.0) },
            ],
            combinator: Combinator::Or,
            action: RouteAction::EscalatePriority,
        }];
        let router = ConditionRouter::new(rules, RouteAction::ProcessNormal);
        let ctx = RoutingContext {
            confidence: Some(0.1),
            spread_pips: Some(6.0),
            ..Default::default()
        };
        let decision = router.route("s1", &ctx);
        assert!(matches!(decision.action, RouteAction::EscalatePriority));
    }
}
