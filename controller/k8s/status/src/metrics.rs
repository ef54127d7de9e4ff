use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    updates: Family<UpdateLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct UpdateLabels {
    kind: &'static str,
    result: &'static str,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum UpdateResult {
    Success,
    NoAction,
    Conflict,
    Error,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let updates = Family::default();
        reg.register(
            "status_updates",
            "Count of status writes by object kind and result",
            updates.clone(),
        );
        Self { updates }
    }

    pub(crate) fn record(&self, kind: &'static str, result: UpdateResult) {
        self.updates
            .get_or_create(&UpdateLabels {
                kind,
                result: result.as_str(),
            })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn count(&self, kind: &'static str, result: UpdateResult) -> u64 {
        self.updates
            .get_or_create(&UpdateLabels {
                kind,
                result: result.as_str(),
            })
            .get()
    }
}

// === impl UpdateResult ===

impl UpdateResult {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NoAction => "no_action",
            Self::Conflict => "conflict",
            Self::Error => "error",
        }
    }
}
