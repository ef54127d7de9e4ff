use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use switchyard_controller_core::{extension::HookPoint, ResourceType};

/// Metrics for proxy configuration streams.
#[derive(Clone, Debug)]
pub struct DeliveryMetrics {
    streams: Family<StreamLabels, Gauge>,
    responses: Family<TypeLabels, Counter>,
    nacks: Family<TypeLabels, Counter>,
}

/// Metrics for extension hook calls.
#[derive(Clone, Debug)]
pub struct HookMetrics {
    calls: Family<HookLabels, Counter>,
}

/// Decrements the stream gauge when the stream ends.
#[derive(Debug)]
pub(crate) struct StreamGuard(Gauge);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Protocol {
    Sotw,
    Delta,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum HookResult {
    Ok,
    Error,
    Timeout,
    NotPermitted,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct StreamLabels {
    protocol: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct TypeLabels {
    protocol: &'static str,
    resource_type: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct HookLabels {
    hook: &'static str,
    result: &'static str,
}

// === impl DeliveryMetrics ===

impl DeliveryMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let streams = Family::<StreamLabels, Gauge>::default();
        reg.register(
            "streams",
            "The number of open configuration streams",
            streams.clone(),
        );

        let responses = Family::<TypeLabels, Counter>::default();
        reg.register(
            "responses",
            "Total number of discovery responses sent",
            responses.clone(),
        );

        let nacks = Family::<TypeLabels, Counter>::default();
        reg.register(
            "nacks",
            "Total number of discovery responses rejected by proxies",
            nacks.clone(),
        );

        Self {
            streams,
            responses,
            nacks,
        }
    }

    pub(crate) fn open_stream(&self, protocol: Protocol) -> StreamGuard {
        let gauge = self
            .streams
            .get_or_create(&StreamLabels::from(protocol))
            .clone();
        gauge.inc();
        StreamGuard(gauge)
    }

    pub(crate) fn response_sent(&self, protocol: Protocol, type_: ResourceType) {
        self.responses
            .get_or_create(&TypeLabels::new(protocol, type_))
            .inc();
    }

    pub(crate) fn nack_received(&self, protocol: Protocol, type_: ResourceType) {
        self.nacks
            .get_or_create(&TypeLabels::new(protocol, type_))
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn open_streams(&self, protocol: Protocol) -> i64 {
        self.streams
            .get_or_create(&StreamLabels::from(protocol))
            .get()
    }

    #[cfg(test)]
    pub(crate) fn nacks(&self, protocol: Protocol, type_: ResourceType) -> u64 {
        self.nacks
            .get_or_create(&TypeLabels::new(protocol, type_))
            .get()
    }
}

impl Default for DeliveryMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

impl From<Protocol> for StreamLabels {
    fn from(protocol: Protocol) -> Self {
        let protocol = match protocol {
            Protocol::Sotw => "sotw",
            Protocol::Delta => "delta",
        };
        Self { protocol }
    }
}

impl TypeLabels {
    fn new(protocol: Protocol, type_: ResourceType) -> Self {
        let resource_type = match type_ {
            ResourceType::Listener => "listener",
            ResourceType::Route => "route",
            ResourceType::Cluster => "cluster",
            ResourceType::Secret => "secret",
            ResourceType::Runtime => "runtime",
        };
        Self {
            protocol: StreamLabels::from(protocol).protocol,
            resource_type,
        }
    }
}

// === impl HookMetrics ===

impl HookMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let calls = Family::<HookLabels, Counter>::default();
        reg.register(
            "hook_calls",
            "Total number of extension hook calls",
            calls.clone(),
        );
        Self { calls }
    }

    pub(crate) fn observe(&self, point: HookPoint, result: HookResult) {
        self.calls
            .get_or_create(&HookLabels::new(point, result))
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn calls(&self, point: HookPoint, result: HookResult) -> u64 {
        self.calls
            .get_or_create(&HookLabels::new(point, result))
            .get()
    }
}

impl HookLabels {
    fn new(point: HookPoint, result: HookResult) -> Self {
        let hook = match point {
            HookPoint::Route => "PostRouteModify",
            HookPoint::VirtualHost => "PostVirtualHostModify",
            HookPoint::Listener => "PostListenerModify",
            HookPoint::Translation => "PostTranslationInsert",
        };
        let result = match result {
            HookResult::Ok => "ok",
            HookResult::Error => "error",
            HookResult::Timeout => "timeout",
            HookResult::NotPermitted => "not_permitted",
        };
        Self { hook, result }
    }
}

impl Default for HookMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
