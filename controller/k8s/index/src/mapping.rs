//! The route-to-backend mapping.

use crate::object::ObjectRef;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Tracks which backends each accepted route references, per group.
///
/// A backend stays relevant to a group while any accepted route in that group
/// references it.
#[derive(Debug, Default)]
pub struct RouteBackends {
    groups: Mutex<HashMap<String, Group>>,
}

#[derive(Debug, Default)]
struct Group {
    routes: HashMap<ObjectRef, BTreeSet<ObjectRef>>,
    refcounts: HashMap<ObjectRef, usize>,
}

// === impl RouteBackends ===

impl RouteBackends {
    /// Sets the backends of an accepted route, returning backends that are no
    /// longer referenced by any route in the group.
    pub fn insert(
        &self,
        group: &str,
        route: ObjectRef,
        backends: BTreeSet<ObjectRef>,
    ) -> Vec<ObjectRef> {
        let mut groups = self.groups.lock();
        let group = groups.entry(group.to_string()).or_default();
        for backend in &backends {
            *group.refcounts.entry(backend.clone()).or_default() += 1;
        }
        match group.routes.insert(route, backends) {
            Some(prior) => group.release(prior),
            None => Vec::new(),
        }
    }

    /// Removes a route, returning backends that are no longer referenced by any
    /// route in the group.
    pub fn remove_route(&self, group: &str, route: &ObjectRef) -> Vec<ObjectRef> {
        let mut groups = self.groups.lock();
        let Some(g) = groups.get_mut(group) else {
            return Vec::new();
        };
        let orphaned = match g.routes.remove(route) {
            Some(prior) => g.release(prior),
            None => Vec::new(),
        };
        if g.routes.is_empty() {
            groups.remove(group);
        }
        orphaned
    }

    /// Removes every route not in `accepted`, returning the backends that
    /// became unreferenced.
    pub fn retain_routes(&self, group: &str, accepted: &HashSet<ObjectRef>) -> Vec<ObjectRef> {
        let stale = {
            let groups = self.groups.lock();
            let Some(g) = groups.get(group) else {
                return Vec::new();
            };
            g.routes
                .keys()
                .filter(|r| !accepted.contains(*r))
                .cloned()
                .collect::<Vec<_>>()
        };
        stale
            .iter()
            .flat_map(|route| self.remove_route(group, route))
            .collect()
    }

    pub fn is_referenced(&self, group: &str, backend: &ObjectRef) -> bool {
        self.groups
            .lock()
            .get(group)
            .is_some_and(|g| g.refcounts.contains_key(backend))
    }

    /// Returns every backend referenced in the group.
    pub fn backends(&self, group: &str) -> BTreeSet<ObjectRef> {
        self.groups
            .lock()
            .get(group)
            .map(|g| g.refcounts.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove_group(&self, group: &str) {
        self.groups.lock().remove(group);
    }
}

// === impl Group ===

impl Group {
    fn release(&mut self, backends: BTreeSet<ObjectRef>) -> Vec<ObjectRef> {
        let mut orphaned = Vec::new();
        for backend in backends {
            if let Some(count) = self.refcounts.get_mut(&backend) {
                *count -= 1;
                if *count == 0 {
                    self.refcounts.remove(&backend);
                    orphaned.push(backend);
                }
            }
        }
        orphaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Kind;

    fn route(name: &str) -> ObjectRef {
        ObjectRef::new(Kind::HttpRoute, "apps", name)
    }

    fn svc(name: &str) -> ObjectRef {
        ObjectRef::new(Kind::Service, "apps", name)
    }

    #[test]
    fn backend_survives_while_any_route_references_it() {
        let mapping = RouteBackends::default();
        assert!(mapping
            .insert("g", route("a"), BTreeSet::from([svc("s")]))
            .is_empty());
        assert!(mapping
            .insert("g", route("b"), BTreeSet::from([svc("s"), svc("t")]))
            .is_empty());

        assert!(mapping.remove_route("g", &route("a")).is_empty());
        assert!(mapping.is_referenced("g", &svc("s")));

        assert_eq!(mapping.remove_route("g", &route("b")), {
            let mut v = vec![svc("s"), svc("t")];
            v.sort();
            v
        });
        assert!(!mapping.is_referenced("g", &svc("s")));
        assert!(mapping.backends("g").is_empty());
    }

    #[test]
    fn reinserting_a_route_releases_dropped_backends() {
        let mapping = RouteBackends::default();
        mapping.insert("g", route("a"), BTreeSet::from([svc("s"), svc("t")]));
        let orphaned = mapping.insert("g", route("a"), BTreeSet::from([svc("t")]));
        assert_eq!(orphaned, vec![svc("s")]);
        assert_eq!(mapping.backends("g"), BTreeSet::from([svc("t")]));
    }

    #[test]
    fn groups_are_independent() {
        let mapping = RouteBackends::default();
        mapping.insert("g1", route("a"), BTreeSet::from([svc("s")]));
        mapping.insert("g2", route("a"), BTreeSet::from([svc("s")]));
        assert_eq!(mapping.remove_route("g1", &route("a")), vec![svc("s")]);
        assert!(mapping.is_referenced("g2", &svc("s")));
    }

    #[test]
    fn retain_routes_drops_unaccepted_routes() {
        let mapping = RouteBackends::default();
        mapping.insert("g", route("a"), BTreeSet::from([svc("s")]));
        mapping.insert("g", route("b"), BTreeSet::from([svc("t")]));
        let accepted = HashSet::from_iter([route("a")]);
        assert_eq!(mapping.retain_routes("g", &accepted), vec![svc("t")]);
        assert_eq!(mapping.backends("g"), BTreeSet::from([svc("s")]));
    }
}
