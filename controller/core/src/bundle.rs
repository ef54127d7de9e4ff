use std::{collections::BTreeMap, fmt, sync::Arc};

/// The categories of configuration a proxy subscribes to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Listener,
    Route,
    Cluster,
    Secret,
    Runtime,
}

/// Encoded resources produced by translation, keyed by type and name.
///
/// Ordered maps keep iteration, and therefore encoding, deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resources(BTreeMap<ResourceType, BTreeMap<String, Vec<u8>>>);

/// An immutable configuration bundle for a group.
///
/// Every resource carries the bundle version at which its body last changed, so
/// that incremental consumers can tell which resources need to be resent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bundle {
    version: u64,
    types: BTreeMap<ResourceType, TypedResources>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedResource {
    pub version: u64,
    pub body: Arc<[u8]>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct TypedResources {
    version: u64,
    resources: BTreeMap<String, VersionedResource>,
}

// === impl ResourceType ===

impl ResourceType {
    pub const ALL: [Self; 5] = [
        Self::Listener,
        Self::Route,
        Self::Cluster,
        Self::Secret,
        Self::Runtime,
    ];

    pub const fn type_url(&self) -> &'static str {
        match self {
            Self::Listener => "type.switchyard.io/switchyard.config.v1.Listener",
            Self::Route => "type.switchyard.io/switchyard.config.v1.Route",
            Self::Cluster => "type.switchyard.io/switchyard.config.v1.Cluster",
            Self::Secret => "type.switchyard.io/switchyard.config.v1.Secret",
            Self::Runtime => "type.switchyard.io/switchyard.config.v1.Runtime",
        }
    }

    pub fn from_type_url(url: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.type_url() == url)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listener => "listener".fmt(f),
            Self::Route => "route".fmt(f),
            Self::Cluster => "cluster".fmt(f),
            Self::Secret => "secret".fmt(f),
            Self::Runtime => "runtime".fmt(f),
        }
    }
}

// === impl Resources ===

impl Resources {
    pub fn insert(
        &mut self,
        type_: ResourceType,
        name: impl Into<String>,
        body: Vec<u8>,
    ) -> Option<Vec<u8>> {
        self.0.entry(type_).or_default().insert(name.into(), body)
    }

    pub fn remove(&mut self, type_: ResourceType, name: &str) -> Option<Vec<u8>> {
        let resources = self.0.get_mut(&type_)?;
        let body = resources.remove(name);
        if resources.is_empty() {
            self.0.remove(&type_);
        }
        body
    }

    pub fn get(&self, type_: ResourceType, name: &str) -> Option<&[u8]> {
        self.0.get(&type_)?.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self, type_: ResourceType) -> impl Iterator<Item = (&str, &[u8])> + '_ {
        self.0
            .get(&type_)
            .into_iter()
            .flat_map(|rs| rs.iter().map(|(n, b)| (n.as_str(), b.as_slice())))
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// === impl Bundle ===

impl Bundle {
    /// Builds a bundle at `version`. Resources whose bodies are unchanged from
    /// `prior` keep their prior versions, as do types with no changes at all.
    pub fn new(version: u64, resources: Resources, prior: Option<&Bundle>) -> Self {
        let types = resources
            .0
            .into_iter()
            .map(|(type_, rs)| {
                let prior = prior.and_then(|b| b.types.get(&type_));
                let resources = rs
                    .into_iter()
                    .map(|(name, body)| {
                        let res = match prior.and_then(|p| p.resources.get(&name)) {
                            Some(p) if *p.body == *body => p.clone(),
                            _ => VersionedResource {
                                version,
                                body: body.into(),
                            },
                        };
                        (name, res)
                    })
                    .collect::<BTreeMap<_, _>>();
                let version = match prior {
                    Some(p) if p.resources == resources => p.version,
                    _ => version,
                };
                (type_, TypedResources { version, resources })
            })
            .collect();
        Self { version, types }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// The version at which resources of this type last changed. Types with no
    /// resources report the bundle version.
    pub fn type_version(&self, type_: ResourceType) -> u64 {
        self.types
            .get(&type_)
            .map(|t| t.version)
            .unwrap_or(self.version)
    }

    pub fn resources(
        &self,
        type_: ResourceType,
    ) -> impl Iterator<Item = (&str, &VersionedResource)> + '_ {
        self.types
            .get(&type_)
            .into_iter()
            .flat_map(|t| t.resources.iter().map(|(n, r)| (n.as_str(), r)))
    }

    pub fn resource(&self, type_: ResourceType, name: &str) -> Option<&VersionedResource> {
        self.types.get(&type_)?.resources.get(name)
    }

    pub fn len(&self) -> usize {
        self.types.values().map(|t| t.resources.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources(items: &[(ResourceType, &str, &str)]) -> Resources {
        let mut rs = Resources::default();
        for (t, n, b) in items {
            rs.insert(*t, *n, b.as_bytes().to_vec());
        }
        rs
    }

    #[test]
    fn type_url_round_trips() {
        for t in ResourceType::ALL {
            assert_eq!(ResourceType::from_type_url(t.type_url()), Some(t));
        }
        assert_eq!(ResourceType::from_type_url("type.example.com/Other"), None);
    }

    #[test]
    fn unchanged_resources_keep_their_version() {
        let b1 = Bundle::new(
            1,
            resources(&[
                (ResourceType::Listener, "l0", "a"),
                (ResourceType::Cluster, "c0", "x"),
            ]),
            None,
        );
        let b2 = Bundle::new(
            2,
            resources(&[
                (ResourceType::Listener, "l0", "b"),
                (ResourceType::Cluster, "c0", "x"),
            ]),
            Some(&b1),
        );

        assert_eq!(b2.version(), 2);
        assert_eq!(
            b2.resource(ResourceType::Listener, "l0").map(|r| r.version),
            Some(2)
        );
        assert_eq!(
            b2.resource(ResourceType::Cluster, "c0").map(|r| r.version),
            Some(1)
        );
        assert_eq!(b2.type_version(ResourceType::Listener), 2);
        assert_eq!(b2.type_version(ResourceType::Cluster), 1);
    }

    #[test]
    fn removing_a_resource_changes_the_type_version() {
        let b1 = Bundle::new(
            1,
            resources(&[
                (ResourceType::Route, "r0", "a"),
                (ResourceType::Route, "r1", "b"),
            ]),
            None,
        );
        let b2 = Bundle::new(2, resources(&[(ResourceType::Route, "r0", "a")]), Some(&b1));
        assert_eq!(b2.type_version(ResourceType::Route), 2);
        assert_eq!(b2.len(), 1);
    }

    #[test]
    fn resources_remove_prunes_empty_types() {
        let mut rs = resources(&[(ResourceType::Secret, "s0", "k")]);
        assert_eq!(rs.remove(ResourceType::Secret, "s0"), Some(b"k".to_vec()));
        assert!(rs.is_empty());
        assert_eq!(rs.remove(ResourceType::Secret, "s0"), None);
    }
}
