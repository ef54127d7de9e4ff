use super::*;
use crate::object::ObjectRef;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use switchyard_controller_core::extension::ExtensionKind;
use switchyard_controller_k8s_api::{
    gateway::{HttpRouteFilter, LocalObjectReference, SecretObjectReference},
    policy::{
        BackendTrafficPolicy, BackendTrafficPolicySpec, BasicAuth, ClientTlsSettings,
        ClientTrafficPolicy, ClientTrafficPolicySpec, ClientValidation, ExtAuth,
        LocalPolicyTargetReference, SecurityPolicy, SecurityPolicySpec,
    },
    ApiResource, ByteString, ConfigMap, DynamicObject, GroupVersionKind, Secret,
};

fn gateway_target(name: &str, section: Option<&str>) -> LocalPolicyTargetReference {
    LocalPolicyTargetReference {
        group: gateway::GROUP.to_string(),
        kind: "Gateway".to_string(),
        name: name.to_string(),
        section_name: section.map(ToString::to_string),
    }
}

fn route_target(name: &str) -> LocalPolicyTargetReference {
    LocalPolicyTargetReference {
        group: gateway::GROUP.to_string(),
        kind: "HTTPRoute".to_string(),
        name: name.to_string(),
        section_name: None,
    }
}

/// The ancestor reference written for a Gateway.
fn ancestor(ns: &str, name: &str, section: Option<&str>) -> ParentReference {
    ParentReference {
        group: Some(gateway::GROUP.to_string()),
        kind: Some("Gateway".to_string()),
        namespace: Some(ns.to_string()),
        name: name.to_string(),
        section_name: section.map(ToString::to_string),
        port: None,
    }
}

fn mk_backend_policy(
    ns: &str,
    name: &str,
    targets: impl IntoIterator<Item = LocalPolicyTargetReference>,
) -> BackendTrafficPolicy {
    let mut policy = BackendTrafficPolicy::new(
        name,
        BackendTrafficPolicySpec {
            target_refs: targets.into_iter().collect(),
            ..Default::default()
        },
    );
    policy.metadata = mk_meta(Some(ns), name);
    policy
}

fn mk_security_policy(ns: &str, name: &str, spec: SecurityPolicySpec) -> SecurityPolicy {
    let mut policy = SecurityPolicy::new(name, spec);
    policy.metadata = mk_meta(Some(ns), name);
    policy
}

fn users_ref(ns: Option<&str>, name: &str) -> SecretObjectReference {
    SecretObjectReference {
        namespace: ns.map(ToString::to_string),
        name: name.to_string(),
        ..Default::default()
    }
}

fn mk_htpasswd(ns: &str, name: &str) -> Secret {
    Secret {
        metadata: mk_meta(Some(ns), name),
        data: Some(btreemap! {
            ".htpasswd".to_string() => ByteString(b"user:{SHA}x".to_vec()),
        }),
        ..Default::default()
    }
}

fn policy_status(test: &TestConfig, kind: StatusKind, ns: &str, name: &str) -> DerivedStatus {
    test.status(kind, ns, name)
        .expect("policy must have status")
}

fn mk_extension_kind(kind: &str) -> ExtensionKind {
    ExtensionKind {
        group: "example.com".to_string(),
        version: "v1".to_string(),
        kind: kind.to_string(),
    }
}

fn mk_extension(kind: &ExtensionKind, ns: &str, name: &str, spec: serde_json::Value) -> DynamicObject {
    let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
    DynamicObject::new(name, &ApiResource::from_gvk(&gvk))
        .within(ns)
        .data(serde_json::json!({ "spec": spec }))
}

#[test]
fn gateway_policy_is_accepted() {
    let test = TestConfig::default();
    mk_edge(&test);
    test.index
        .write()
        .apply_object(mk_backend_policy("ns-0", "timeouts", [gateway_target("gw", None)]));
    test.reconcile();

    let snapshot = test.snapshot("edge").unwrap();
    assert!(snapshot
        .backend_traffic_policies
        .contains_key(&ObjectId::new("ns-0", "timeouts")));

    let status = policy_status(&test, StatusKind::BackendTrafficPolicy, "ns-0", "timeouts");
    let ancestors = status
        .parents()
        .iter()
        .map(|p| p.parent_ref.clone())
        .collect::<Vec<_>>();
    assert_eq!(ancestors, vec![ancestor("ns-0", "gw", None)]);
    let accepted = find_condition(&status, "Accepted").unwrap();
    assert_eq!(accepted.status, "True");
    assert_eq!(accepted.message, "Policy has been accepted");
}

#[test]
fn policy_without_targets_in_the_group_is_skipped() {
    let test = TestConfig::default();
    mk_edge(&test);
    {
        let mut idx = test.index.write();
        idx.apply_object(mk_backend_policy("ns-0", "absent", [gateway_target("nope", None)]));
        idx.apply_object(mk_backend_policy(
            "ns-0",
            "section",
            [gateway_target("gw", Some("https"))],
        ));
        // Targets resolve in the policy's own namespace.
        idx.apply_object(mk_backend_policy("ns-1", "elsewhere", [gateway_target("gw", None)]));
    }
    test.reconcile();

    assert!(test
        .snapshot("edge")
        .unwrap()
        .backend_traffic_policies
        .is_empty());
    for (ns, name) in [("ns-0", "absent"), ("ns-0", "section"), ("ns-1", "elsewhere")] {
        assert!(
            test.status(StatusKind::BackendTrafficPolicy, ns, name)
                .is_none(),
            "{ns}/{name}"
        );
    }
}

#[test]
fn section_target_names_the_listener() {
    let test = TestConfig::default();
    mk_edge(&test);
    test.index.write().apply_object(mk_backend_policy(
        "ns-0",
        "http-only",
        [gateway_target("gw", Some("http"))],
    ));
    test.reconcile();

    let status = policy_status(&test, StatusKind::BackendTrafficPolicy, "ns-0", "http-only");
    assert_eq!(
        status.parents()[0].parent_ref,
        ancestor("ns-0", "gw", Some("http"))
    );
}

#[test]
fn route_policy_reports_the_route_parents() {
    let test = TestConfig::default();
    mk_edge(&test);
    {
        let mut idx = test.index.write();
        idx.apply_object(mk_http_route(
            "ns-1",
            "web",
            [mk_parent(Some("ns-0"), "gw", None)],
            [],
        ));
        idx.apply_object(mk_backend_policy("ns-1", "retries", [route_target("web")]));
    }
    test.reconcile();

    let status = policy_status(&test, StatusKind::BackendTrafficPolicy, "ns-1", "retries");
    assert_eq!(status.parents()[0].parent_ref, ancestor("ns-0", "gw", None));
    assert!(test
        .snapshot("edge")
        .unwrap()
        .backend_traffic_policies
        .contains_key(&ObjectId::new("ns-1", "retries")));
}

#[test]
fn basic_auth_requires_htpasswd_secret() {
    let test = TestConfig::default();
    mk_edge(&test);
    let spec = SecurityPolicySpec {
        target_refs: vec![gateway_target("gw", None)],
        basic_auth: Some(BasicAuth {
            users: users_ref(None, "users"),
        }),
        ..Default::default()
    };
    test.index
        .write()
        .apply_object(mk_security_policy("ns-0", "auth", spec));
    test.reconcile();

    let status = policy_status(&test, StatusKind::SecurityPolicy, "ns-0", "auth");
    let accepted = find_condition(&status, "Accepted").unwrap();
    assert_eq!(accepted.status, "False");
    assert_eq!(accepted.reason, "Invalid");
    assert!(test.snapshot("edge").unwrap().security_policies.is_empty());

    test.index.write().apply_object(mk_htpasswd("ns-0", "users"));
    test.reconcile();

    let status = policy_status(&test, StatusKind::SecurityPolicy, "ns-0", "auth");
    assert_eq!(find_condition(&status, "Accepted").unwrap().status, "True");
    let snapshot = test.snapshot("edge").unwrap();
    assert!(snapshot
        .security_policies
        .contains_key(&ObjectId::new("ns-0", "auth")));
    assert!(snapshot
        .secrets
        .contains_key(&ObjectId::new("ns-0", "users")));
}

#[test]
fn basic_auth_users_must_be_local() {
    let test = TestConfig::default();
    mk_edge(&test);
    let spec = SecurityPolicySpec {
        target_refs: vec![gateway_target("gw", None)],
        basic_auth: Some(BasicAuth {
            users: users_ref(Some("secrets"), "users"),
        }),
        ..Default::default()
    };
    {
        let mut idx = test.index.write();
        idx.apply_object(mk_htpasswd("secrets", "users"));
        idx.apply_object(mk_security_policy("ns-0", "auth", spec));
    }
    test.reconcile();

    let status = policy_status(&test, StatusKind::SecurityPolicy, "ns-0", "auth");
    let accepted = find_condition(&status, "Accepted").unwrap();
    assert_eq!(accepted.reason, "Invalid");
    assert_eq!(
        accepted.message,
        "Basic auth users must be in the policy's namespace"
    );
}

#[test]
fn ext_auth_backend_joins_the_snapshot() {
    let test = TestConfig::default();
    mk_edge(&test);
    let spec = SecurityPolicySpec {
        target_refs: vec![gateway_target("gw", None)],
        ext_auth: Some(ExtAuth {
            backend_refs: vec![mk_backend(None, "authz", 9000)],
            ..Default::default()
        }),
        ..Default::default()
    };
    {
        let mut idx = test.index.write();
        idx.apply_object(mk_service("ns-0", "authz"));
        idx.apply_object(mk_security_policy("ns-0", "ext", spec));
    }
    test.reconcile();

    let status = policy_status(&test, StatusKind::SecurityPolicy, "ns-0", "ext");
    assert_eq!(find_condition(&status, "Accepted").unwrap().status, "True");
    assert!(test
        .snapshot("edge")
        .unwrap()
        .services
        .contains_key(&ObjectId::new("ns-0", "authz")));
}

#[test]
fn client_validation_reads_ca_config_map() {
    let test = TestConfig::default();
    mk_edge(&test);
    let mut policy = ClientTrafficPolicy::new(
        "mtls",
        ClientTrafficPolicySpec {
            target_refs: vec![gateway_target("gw", None)],
            tls: Some(ClientTlsSettings {
                client_validation: Some(ClientValidation {
                    optional: false,
                    ca_certificate_refs: vec![SecretObjectReference {
                        kind: Some("ConfigMap".to_string()),
                        name: "ca".to_string(),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    policy.metadata = mk_meta(Some("ns-0"), "mtls");
    {
        let mut idx = test.index.write();
        idx.apply_object(ConfigMap {
            metadata: mk_meta(Some("ns-0"), "ca"),
            data: Some(btreemap! { "ca.crt".to_string() => "pem".to_string() }),
            ..Default::default()
        });
        idx.apply_object(policy);
    }
    test.reconcile();

    let status = policy_status(&test, StatusKind::ClientTrafficPolicy, "ns-0", "mtls");
    assert_eq!(find_condition(&status, "Accepted").unwrap().status, "True");
    let snapshot = test.snapshot("edge").unwrap();
    assert!(snapshot
        .config_maps
        .contains_key(&ObjectId::new("ns-0", "ca")));
    assert!(snapshot
        .client_traffic_policies
        .contains_key(&ObjectId::new("ns-0", "mtls")));
}

#[test]
fn extension_policies_follow_their_targets() {
    let kind = mk_extension_kind("RateLimit");
    let test = TestConfig::new(Config {
        controllers: vec![CONTROLLER.to_string()],
        extension_policy_kinds: vec![kind.clone()],
        ..Default::default()
    });
    mk_edge(&test);
    test.index.write().reset_extensions(
        &kind,
        vec![
            mk_extension(
                &kind,
                "ns-0",
                "limit",
                serde_json::json!({
                    "targetRefs": [{
                        "group": gateway::GROUP,
                        "kind": "Gateway",
                        "name": "gw",
                    }],
                }),
            ),
            mk_extension(
                &kind,
                "ns-0",
                "stray",
                serde_json::json!({
                    "targetRefs": [{
                        "group": gateway::GROUP,
                        "kind": "Gateway",
                        "name": "other",
                    }],
                }),
            ),
        ],
    );
    test.reconcile();

    let snapshot = test.snapshot("edge").unwrap();
    let names = snapshot
        .extension_policies
        .keys()
        .map(|oref| oref.id.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["limit"]);
    let obj = &snapshot.extension_policies[&ObjectRef {
        kind: Kind::Extension(kind.clone()),
        id: ObjectId::new("ns-0", "limit"),
    }];
    let json: serde_json::Value = serde_json::from_slice(&obj.json).unwrap();
    assert_eq!(json["spec"]["targetRefs"][0]["name"], "gw");
}

#[test]
fn extension_filter_resolves_into_the_snapshot() {
    let kind = mk_extension_kind("Rewrite");
    let test = TestConfig::new(Config {
        controllers: vec![CONTROLLER.to_string()],
        extension_kinds: vec![kind.clone()],
        ..Default::default()
    });
    mk_edge(&test);
    let mut route = mk_http_route("ns-1", "web", [mk_parent(Some("ns-0"), "gw", None)], []);
    route.spec.rules = Some(vec![HttpRouteRule {
        filters: Some(vec![HttpRouteFilter {
            type_: "ExtensionRef".to_string(),
            extension_ref: Some(LocalObjectReference {
                group: "example.com".to_string(),
                kind: "Rewrite".to_string(),
                name: "strip".to_string(),
            }),
            ..Default::default()
        }]),
        ..Default::default()
    }]);
    {
        let mut idx = test.index.write();
        idx.apply_object(route);
        idx.reset_extensions(&kind, vec![]);
    }
    test.reconcile();

    let status = test.status(StatusKind::HttpRoute, "ns-1", "web").unwrap();
    assert_eq!(
        find_condition(&status, "ResolvedRefs").unwrap().reason,
        "RefNotFound"
    );

    test.index.write().apply_extension(
        &kind,
        mk_extension(&kind, "ns-1", "strip", serde_json::json!({ "prefix": "/api" })),
    );
    test.reconcile();

    let status = test.status(StatusKind::HttpRoute, "ns-1", "web").unwrap();
    assert_eq!(
        find_condition(&status, "ResolvedRefs").unwrap().status,
        "True"
    );
    let snapshot = test.snapshot("edge").unwrap();
    let ext = snapshot
        .extension_objects()
        .next()
        .expect("filter object must be included");
    assert_eq!(ext.name, "strip");
    assert_eq!(ext.namespace.as_deref(), Some("ns-1"));
}
