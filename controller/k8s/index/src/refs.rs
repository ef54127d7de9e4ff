use crate::object::ObjectRef;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};

/// A reverse index from referenced objects to the objects that reference
/// them.
#[derive(Debug, Default)]
pub struct RefIndex {
    by_target: HashMap<ObjectRef, HashSet<ObjectRef>>,
    by_referrer: HashMap<ObjectRef, Vec<ObjectRef>>,
}

// === impl RefIndex ===

impl RefIndex {
    /// Replaces the set of objects `referrer` references.
    pub fn update(&mut self, referrer: ObjectRef, targets: Vec<ObjectRef>) {
        self.remove(&referrer);
        if targets.is_empty() {
            return;
        }
        for target in &targets {
            self.by_target
                .entry(target.clone())
                .or_default()
                .insert(referrer.clone());
        }
        self.by_referrer.insert(referrer, targets);
    }

    pub fn remove(&mut self, referrer: &ObjectRef) {
        let Some(targets) = self.by_referrer.remove(referrer) else {
            return;
        };
        for target in targets {
            if let Some(referrers) = self.by_target.get_mut(&target) {
                referrers.remove(referrer);
                if referrers.is_empty() {
                    self.by_target.remove(&target);
                }
            }
        }
    }

    pub fn referrers(&self, target: &ObjectRef) -> impl Iterator<Item = &ObjectRef> {
        self.by_target.get(target).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Kind;

    #[test]
    fn tracks_referrers() {
        let mut refs = RefIndex::default();
        let route_a = ObjectRef::new(Kind::HttpRoute, "apps", "a");
        let route_b = ObjectRef::new(Kind::GrpcRoute, "apps", "b");
        let svc = ObjectRef::new(Kind::Service, "apps", "web");
        let secret = ObjectRef::new(Kind::Secret, "apps", "cert");

        refs.update(route_a.clone(), vec![svc.clone()]);
        refs.update(route_b.clone(), vec![svc.clone(), secret.clone()]);
        let mut referrers = refs.referrers(&svc).cloned().collect::<Vec<_>>();
        referrers.sort();
        assert_eq!(referrers, vec![route_a.clone(), route_b.clone()]);

        refs.update(route_b.clone(), vec![secret.clone()]);
        assert_eq!(refs.referrers(&svc).collect::<Vec<_>>(), vec![&route_a]);

        refs.remove(&route_a);
        assert_eq!(refs.referrers(&svc).count(), 0);
        assert_eq!(refs.referrers(&secret).collect::<Vec<_>>(), vec![&route_b]);
    }
}
