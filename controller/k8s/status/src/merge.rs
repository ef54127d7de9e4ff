//! Merges derived status into an object's live status.
//!
//! Only entries attributed to the writing controller are touched. Parent
//! entries are keyed by `(controllerName, parentRef)`. An entry of ours that is
//! absent from the derived status is removed only if the derived status lists
//! it as superseded.

use crate::status::Status;
use chrono::{DateTime, Utc};
use switchyard_controller_k8s_api::{
    gateway::{GatewayStatus, ListenerStatus, ParentReference, RouteParentStatus},
    policy::PolicyAncestorStatus,
    Condition, Time,
};
use switchyard_controller_k8s_index::{DerivedStatus, ParentStatus};

/// Returns the merged status, or `None` if the derived status does not have the
/// live status's shape.
///
/// Conditions whose status is unchanged keep their live transition time; all
/// others are stamped with `now`.
pub fn merge(
    controller: &str,
    live: Status,
    derived: &DerivedStatus,
    now: &Time,
) -> Option<Status> {
    let merged = match (live, derived) {
        (Status::GatewayClass(mut live), DerivedStatus::GatewayClass(conditions)) => {
            let prior = live.conditions.take().unwrap_or_default();
            live.conditions = Some(carry_times(&prior, conditions, now));
            Status::GatewayClass(live)
        }
        (Status::Gateway(live), DerivedStatus::Gateway(next)) => {
            Status::Gateway(merge_gateway(live, next, now))
        }
        (
            Status::Route(mut live),
            DerivedStatus::Parents {
                parents,
                superseded,
            },
        ) => {
            merge_entries(&mut live.parents, controller, parents, superseded, now);
            Status::Route(live)
        }
        (
            Status::Policy(mut live),
            DerivedStatus::Parents {
                parents,
                superseded,
            },
        ) => {
            merge_entries(&mut live.ancestors, controller, parents, superseded, now);
            Status::Policy(live)
        }
        _ => return None,
    };
    Some(merged)
}

/// Returns true if two statuses differ at most in transition times.
pub fn is_same(a: &Status, b: &Status) -> bool {
    let (mut a, mut b) = (a.clone(), b.clone());
    a.for_each_condition(clear_time);
    b.for_each_condition(clear_time);
    a == b
}

fn clear_time(c: &mut Condition) {
    c.last_transition_time = Time(DateTime::<Utc>::UNIX_EPOCH);
}

fn carry_times(prior: &[Condition], next: &[Condition], now: &Time) -> Vec<Condition> {
    next.iter()
        .map(|c| {
            let last_transition_time = prior
                .iter()
                .find(|p| p.type_ == c.type_ && p.status == c.status)
                .map(|p| p.last_transition_time.clone())
                .unwrap_or_else(|| now.clone());
            Condition {
                last_transition_time,
                ..c.clone()
            }
        })
        .collect()
}

fn merge_gateway(live: GatewayStatus, next: &GatewayStatus, now: &Time) -> GatewayStatus {
    let prior_conditions = live.conditions.unwrap_or_default();
    let prior_listeners = live.listeners.unwrap_or_default();

    let listeners = next.listeners.as_ref().map(|listeners| {
        listeners
            .iter()
            .map(|l| {
                let prior = prior_listeners
                    .iter()
                    .find(|p| p.name == l.name)
                    .map(|p| &*p.conditions)
                    .unwrap_or_default();
                ListenerStatus {
                    conditions: carry_times(prior, &l.conditions, now),
                    ..l.clone()
                }
            })
            .collect()
    });

    GatewayStatus {
        addresses: next.addresses.clone(),
        conditions: next
            .conditions
            .as_ref()
            .map(|c| carry_times(&prior_conditions, c, now)),
        listeners,
    }
}

/// A per-parent status entry owned by one controller.
trait ParentEntry {
    fn new(controller: &str, parent_ref: ParentReference, conditions: Vec<Condition>) -> Self;
    fn controller(&self) -> &str;
    fn parent_ref(&self) -> &ParentReference;
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

fn merge_entries<E: ParentEntry>(
    entries: &mut Vec<E>,
    controller: &str,
    parents: &[ParentStatus],
    superseded: &[ParentReference],
    now: &Time,
) {
    entries.retain(|e| {
        e.controller() != controller
            || !superseded.contains(e.parent_ref())
            || parents.iter().any(|p| &p.parent_ref == e.parent_ref())
    });

    for parent in parents {
        let existing = entries
            .iter_mut()
            .find(|e| e.controller() == controller && e.parent_ref() == &parent.parent_ref);
        match existing {
            Some(entry) => {
                let conditions = carry_times(entry.conditions_mut(), &parent.conditions, now);
                *entry.conditions_mut() = conditions;
            }
            None => entries.push(E::new(
                controller,
                parent.parent_ref.clone(),
                carry_times(&[], &parent.conditions, now),
            )),
        }
    }
}

impl ParentEntry for RouteParentStatus {
    fn new(controller: &str, parent_ref: ParentReference, conditions: Vec<Condition>) -> Self {
        Self {
            parent_ref,
            controller_name: controller.to_string(),
            conditions,
        }
    }

    fn controller(&self) -> &str {
        &self.controller_name
    }

    fn parent_ref(&self) -> &ParentReference {
        &self.parent_ref
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl ParentEntry for PolicyAncestorStatus {
    fn new(controller: &str, ancestor_ref: ParentReference, conditions: Vec<Condition>) -> Self {
        Self {
            ancestor_ref,
            controller_name: controller.to_string(),
            conditions,
        }
    }

    fn controller(&self) -> &str {
        &self.controller_name
    }

    fn parent_ref(&self) -> &ParentReference {
        &self.ancestor_ref
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}
