//! Ready-condition bookkeeping shared by issuers and certificate requests.
//!
//! `set_ready_condition` is pure: it never touches the API server. The caller
//! replaces the resource's condition list wholesale with the returned one and
//! decides whether the reported [`Transition`] is worth logging.

use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_APPROVED: &str = "Approved";
pub const CONDITION_DENIED: &str = "Denied";

/// Tri-state value of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, e.g. `Ready`.
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    /// Time of the last status change of this condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    /// Machine readable reason for the last transition.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Human readable details complementing `reason`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// What `set_ready_condition` did to the Ready condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No Ready condition existed; one was appended.
    Added,
    /// The status value changed; the transition time was reset.
    Changed { from: ConditionStatus },
    /// Same status value; only reason and message were refreshed.
    Unchanged,
}

impl Transition {
    pub fn is_transition(&self) -> bool {
        !matches!(self, Transition::Unchanged)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionUpdate {
    pub conditions: Vec<Condition>,
    pub transition: Transition,
}

/// Computes the condition list that results from setting the Ready condition.
///
/// Conditions of other types are carried over untouched. At most one Ready
/// condition survives; stray duplicates are dropped.
pub fn set_ready_condition(
    existing: &[Condition],
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> ConditionUpdate {
    let mut conditions = Vec::with_capacity(existing.len() + 1);
    let mut transition = None;

    for condition in existing {
        if condition.type_ != CONDITION_READY {
            conditions.push(condition.clone());
            continue;
        }
        if transition.is_some() {
            continue;
        }

        let (last_transition_time, change) = if condition.status == status {
            (condition.last_transition_time.clone(), Transition::Unchanged)
        } else {
            (
                Some(Time(now)),
                Transition::Changed {
                    from: condition.status,
                },
            )
        };
        conditions.push(Condition {
            type_: CONDITION_READY.to_string(),
            status,
            last_transition_time,
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: condition.observed_generation,
        });
        transition = Some(change);
    }

    let transition = match transition {
        Some(transition) => transition,
        None => {
            conditions.push(Condition {
                type_: CONDITION_READY.to_string(),
                status,
                last_transition_time: Some(Time(now)),
                reason: reason.to_string(),
                message: message.to_string(),
                observed_generation: None,
            });
            Transition::Added
        }
    };

    ConditionUpdate {
        conditions,
        transition,
    }
}

/// Returns true when a condition with the given type and status exists.
/// Reason, message and timestamps are not compared.
pub fn has_condition(conditions: &[Condition], type_: &str, status: ConditionStatus) -> bool {
    conditions
        .iter()
        .any(|condition| condition.type_ == type_ && condition.status == status)
}
