use super::*;
use maplit::{btreemap, btreeset};
use pretty_assertions::assert_eq;
use switchyard_controller_k8s_api::{
    gateway::{GatewayTlsConfig, SecretObjectReference},
    labels, EndpointSlice, Secret,
};

const OTHER: &str = "gateway.switchyard.io/other";

fn two_controllers() -> TestConfig {
    TestConfig::new(Config {
        controllers: vec![CONTROLLER.to_string(), OTHER.to_string()],
        ..Default::default()
    })
}

fn mk_slice(ns: &str, name: &str, svc: &str) -> EndpointSlice {
    EndpointSlice {
        metadata: ObjectMeta {
            labels: Some(btreemap! {
                labels::SERVICE_NAME.to_string() => svc.to_string(),
            }),
            ..mk_meta(Some(ns), name)
        },
        address_type: "IPv4".to_string(),
        ..Default::default()
    }
}

#[test]
fn route_enqueues_its_gateways_controller() {
    let mut test = two_controllers();
    {
        let mut idx = test.index.write();
        idx.apply_object(mk_class("edge", CONTROLLER, 0));
        idx.apply_object(mk_class("other", OTHER, 0));
        idx.apply_object(mk_gateway("ns-0", "gw", "edge", []));
    }
    test.enqueued();

    test.index.write().apply_object(mk_http_route(
        "ns-0",
        "web",
        [mk_parent(None, "gw", None)],
        [],
    ));
    assert_eq!(test.enqueued(), btreeset![CONTROLLER.to_string()]);
}

#[test]
fn status_only_updates_are_ignored() {
    let mut test = TestConfig::default();
    mk_edge(&test);
    test.enqueued();

    let mut gw = mk_gateway("ns-0", "gw", "edge", [mk_listener("http", "HTTP", 80, None)]);
    // Same generation, new resource version.
    gw.metadata.resource_version = Some("2".to_string());
    gw.status = Some(Default::default());
    test.index.write().apply_object(gw.clone());
    assert!(test.enqueued().is_empty());
    assert!(test.index.read().objects().gateways[&ObjectId::new("ns-0", "gw")]
        .status
        .is_some());

    bump(&mut gw.metadata);
    test.index.write().apply_object(gw);
    assert_eq!(test.enqueued(), btreeset![CONTROLLER.to_string()]);
}

#[test]
fn label_changes_are_not_ignored() {
    let mut test = TestConfig::default();
    mk_edge(&test);
    test.enqueued();

    let mut gw = mk_gateway("ns-0", "gw", "edge", [mk_listener("http", "HTTP", 80, None)]);
    gw.metadata.labels = Some(btreemap! { "tier".to_string() => "edge".to_string() });
    test.index.write().apply_object(gw);
    assert_eq!(test.enqueued(), btreeset![CONTROLLER.to_string()]);
}

#[test]
fn reference_grants_enqueue_every_controller() {
    let mut test = two_controllers();
    test.index
        .write()
        .apply_object(mk_grant("ns-2", "allow", "HTTPRoute", "ns-1", "Service"));
    assert_eq!(
        test.enqueued(),
        btreeset![CONTROLLER.to_string(), OTHER.to_string()]
    );

    test.index
        .write()
        .delete_object::<ReferenceGrant>(ObjectId::new("ns-2", "allow"));
    assert_eq!(
        test.enqueued(),
        btreeset![CONTROLLER.to_string(), OTHER.to_string()]
    );
}

#[test]
fn namespace_label_changes_enqueue_every_controller() {
    use kubert::index::IndexClusterResource;

    let mut test = two_controllers();
    test.index.write().apply(mk_namespace("ns-1", []));
    test.enqueued();

    let mut ns = mk_namespace("ns-1", [("team", "web")]);
    ns.metadata.resource_version = Some("2".to_string());
    test.index.write().apply(ns);
    assert_eq!(
        test.enqueued(),
        btreeset![CONTROLLER.to_string(), OTHER.to_string()]
    );
}

#[test]
fn endpoint_slices_enqueue_groups_holding_their_service() {
    let mut test = TestConfig::default();
    mk_edge(&test);
    {
        let mut idx = test.index.write();
        idx.apply_object(mk_service("ns-1", "web"));
        idx.apply_object(mk_http_route(
            "ns-1",
            "web",
            [mk_parent(Some("ns-0"), "gw", None)],
            [mk_backend(None, "web", 8080)],
        ));
    }
    test.reconcile();
    test.enqueued();

    test.index
        .write()
        .apply_object(mk_slice("ns-1", "web-abc", "web"));
    assert_eq!(test.enqueued(), btreeset![CONTROLLER.to_string()]);
    assert!(test
        .snapshot("edge")
        .is_some_and(|s| s.endpoint_slices.is_empty()));

    test.reconcile();
    assert!(test
        .snapshot("edge")
        .unwrap()
        .endpoint_slices
        .contains_key(&ObjectId::new("ns-1", "web-abc")));

    // Slices of unrelated Services are not interesting.
    test.enqueued();
    test.index
        .write()
        .apply_object(mk_slice("ns-1", "db-abc", "db"));
    assert!(test.enqueued().is_empty());
}

#[test]
fn referenced_secret_enqueues_before_any_pass() {
    let mut test = TestConfig::default();
    let listener = Listener {
        tls: Some(GatewayTlsConfig {
            mode: None,
            certificate_refs: Some(vec![SecretObjectReference {
                name: "cert".to_string(),
                ..Default::default()
            }]),
        }),
        ..mk_listener("https", "HTTPS", 443, None)
    };
    {
        let mut idx = test.index.write();
        idx.apply_object(mk_class("edge", CONTROLLER, 0));
        idx.apply_object(mk_gateway("ns-0", "gw", "edge", [listener]));
    }
    test.enqueued();

    test.index.write().apply_object(Secret {
        metadata: mk_meta(Some("ns-0"), "cert"),
        ..Default::default()
    });
    assert_eq!(test.enqueued(), btreeset![CONTROLLER.to_string()]);
}

#[test]
fn unrelated_objects_enqueue_nothing() {
    let mut test = TestConfig::default();
    mk_edge(&test);
    test.reconcile();
    test.enqueued();

    {
        let mut idx = test.index.write();
        idx.apply_object(mk_service("ns-9", "unused"));
        idx.apply_object(mk_gateway("ns-0", "foreign", "not-ours", []));
        idx.apply_object(mk_class("theirs", "example.com/controller", 0));
    }
    assert!(test.enqueued().is_empty());
}

#[test]
fn class_moving_between_controllers_enqueues_both() {
    let mut test = two_controllers();
    let mut class = mk_class("edge", CONTROLLER, 0);
    test.index.write().apply_object(class.clone());
    test.enqueued();

    class.spec.controller_name = OTHER.to_string();
    bump(&mut class.metadata);
    test.index.write().apply_object(class);
    assert_eq!(
        test.enqueued(),
        btreeset![CONTROLLER.to_string(), OTHER.to_string()]
    );
}

#[test]
fn sync_enqueues_every_controller() {
    let (queue, mut rx) = Queue::unbounded();
    let index = Index::shared(
        Config {
            controllers: vec![CONTROLLER.to_string(), OTHER.to_string()],
            ..Default::default()
        },
        NodeAddresses::default(),
        queue,
    );
    index.write().mark_synced(Kind::Gateway);
    let mut keys = BTreeSet::new();
    while let Ok(key) = rx.try_recv() {
        keys.insert(key);
    }
    assert_eq!(keys, btreeset![CONTROLLER.to_string(), OTHER.to_string()]);

    // Only the first sync of a kind counts.
    index.write().mark_synced(Kind::Gateway);
    assert!(rx.try_recv().is_err());
}
