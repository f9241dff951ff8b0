//! Risk rule set — named, weighted, enable-able predicates.
//!
//! Rules are data-driven descriptors (field, operator, value, weight), not
//! closures: they serialize cleanly, audit cleanly, and carry no hidden
//! logic. Rules are evaluated independently; triggered weights are summed by
//! the scorer with no ordering dependency between rules.
//!
//! The live set sits behind `RuleRegistry`: admin mutations copy the current
//! set, modify it, bump the version and swap the `Arc`, so an evaluation that
//! took a snapshot never observes a set mid-mutation.

use crate::{scoring::Signal, transaction::TransactionAttempt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    Amount,
    Currency,
    CustomerEmail,
    IpAddress,
    MerchantId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleOp {
    GreaterThan,
    AtLeast,
    LessThan,
    Equals,
    NotEquals,
    OneOf,
    Missing,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RuleValue {
    Int(i64),
    Text(String),
    TextList(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDescriptor {
    pub id: String,
    pub name: String,
    pub field: RuleField,
    pub op: RuleOp,
    /// Comparison operand. Ignored by `Missing`.
    #[serde(default)]
    pub value: Option<RuleValue>,
    pub weight: u32,
    pub enabled: bool,
}

enum FieldValue<'a> {
    Int(i64),
    Text(&'a str),
    Absent,
}

impl RuleDescriptor {
    fn extract<'a>(&self, attempt: &'a TransactionAttempt) -> FieldValue<'a> {
        match self.field {
            RuleField::Amount => FieldValue::Int(attempt.amount),
            RuleField::Currency => FieldValue::Text(&attempt.currency),
            RuleField::MerchantId => FieldValue::Text(&attempt.merchant_id),
            RuleField::CustomerEmail => match attempt.customer_email.as_deref() {
                Some(v) => FieldValue::Text(v),
                None => FieldValue::Absent,
            },
            RuleField::IpAddress => match attempt.ip_address.as_deref() {
                Some(v) => FieldValue::Text(v),
                None => FieldValue::Absent,
            },
        }
    }

    /// Evaluate this rule's predicate against one transaction attempt.
    pub fn matches(&self, attempt: &TransactionAttempt) -> bool {
        let field = self.extract(attempt);

        if self.op == RuleOp::Missing {
            return matches!(field, FieldValue::Absent);
        }

        match (field, &self.value) {
            (FieldValue::Int(actual), Some(RuleValue::Int(operand))) => match self.op {
                RuleOp::GreaterThan => actual > *operand,
                RuleOp::AtLeast => actual >= *operand,
                RuleOp::LessThan => actual < *operand,
                RuleOp::Equals => actual == *operand,
                RuleOp::NotEquals => actual != *operand,
                _ => false,
            },
            (FieldValue::Text(actual), Some(RuleValue::Text(operand))) => match self.op {
                RuleOp::Equals => actual == operand,
                RuleOp::NotEquals => actual != operand,
                _ => false,
            },
            (FieldValue::Text(actual), Some(RuleValue::TextList(operands))) => match self.op {
                RuleOp::OneOf => operands.iter().any(|o| o == actual),
                _ => false,
            },
            // Absent fields only match `Missing`; type mismatches never match.
            _ => false,
        }
    }
}

/// An immutable, versioned snapshot of the rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub version: u64,
    pub rules: Vec<RuleDescriptor>,
}

impl RuleSet {
    pub fn new(rules: Vec<RuleDescriptor>) -> Self {
        Self { version: 1, rules }
    }

    /// Evaluate every enabled rule; return one signal per triggered rule.
    pub fn evaluate(&self, attempt: &TransactionAttempt) -> Vec<Signal> {
        self.rules
            .iter()
            .filter(|r| r.enabled && r.matches(attempt))
            .map(|r| Signal {
                name: r.name.clone(),
                weight: r.weight,
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&RuleDescriptor> {
        self.rules.iter().find(|r| r.id == id)
    }
}

/// Single-writer registry with copy-on-write snapshots.
pub struct RuleRegistry {
    current: RwLock<Arc<RuleSet>>,
}

impl RuleRegistry {
    pub fn new(rules: Vec<RuleDescriptor>) -> Self {
        Self {
            current: RwLock::new(Arc::new(RuleSet::new(rules))),
        }
    }

    /// Cheap read of the current set. Evaluations hold this snapshot for
    /// their whole run; later mutations do not affect it.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.current.read().expect("rule registry poisoned").clone()
    }

    fn mutate<F: FnOnce(&mut Vec<RuleDescriptor>)>(&self, f: F) {
        let mut guard = self.current.write().expect("rule registry poisoned");
        let mut next = RuleSet {
            version: guard.version + 1,
            rules: guard.rules.clone(),
        };
        f(&mut next.rules);
        *guard = Arc::new(next);
    }

    /// Add a rule, or replace the rule with the same id.
    pub fn upsert(&self, rule: RuleDescriptor) {
        self.mutate(|rules| {
            if let Some(existing) = rules.iter_mut().find(|r| r.id == rule.id) {
                *existing = rule;
            } else {
                rules.push(rule);
            }
        });
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut removed = false;
        self.mutate(|rules| {
            let before = rules.len();
            rules.retain(|r| r.id != id);
            removed = rules.len() != before;
        });
        removed
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut found = false;
        self.mutate(|rules| {
            if let Some(rule) = rules.iter_mut().find(|r| r.id == id) {
                rule.enabled = enabled;
                found = true;
            }
        });
        found
    }
}

/// Merchant-agnostic default rules. Operators adjust per deployment.
pub fn default_rules() -> Vec<RuleDescriptor> {
    vec![
        RuleDescriptor {
            id: "large-amount".to_string(),
            name: "large transaction amount".to_string(),
            field: RuleField::Amount,
            op: RuleOp::GreaterThan,
            value: Some(RuleValue::Int(500_000)),
            weight: 20,
            enabled: true,
        },
        RuleDescriptor {
            id: "missing-customer-email".to_string(),
            name: "missing customer email".to_string(),
            field: RuleField::CustomerEmail,
            op: RuleOp::Missing,
            value: None,
            weight: 10,
            enabled: true,
        },
        RuleDescriptor {
            id: "missing-ip-address".to_string(),
            name: "missing ip address".to_string(),
            field: RuleField::IpAddress,
            op: RuleOp::Missing,
            value: None,
            weight: 10,
            enabled: true,
        },
    ]
}
