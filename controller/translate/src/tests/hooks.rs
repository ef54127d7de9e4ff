use super::*;
use pretty_assertions::assert_eq;
use switchyard_controller_core::extension::ExtensionKind;

async fn translate_with(hooks: FakeHooks, snapshot: &ResourceSnapshot) -> (Translation, Vec<Call>) {
    let calls = hooks.calls.clone();
    let translation = Translator::new(hooks).translate(snapshot).await;
    let calls = calls.lock().clone();
    (translation, calls)
}

fn mk_extension_policy(name: &str, section: &str) -> ExtensionObject {
    let json = serde_json::json!({
        "apiVersion": "example.io/v1",
        "kind": "RateLimit",
        "metadata": { "namespace": NS, "name": name },
        "spec": {
            "targetRefs": [{
                "group": "gateway.networking.k8s.io",
                "kind": "Gateway",
                "name": GATEWAY,
                "sectionName": section,
            }],
        },
    });
    ExtensionObject {
        kind: ExtensionKind {
            group: "example.io".to_string(),
            version: "v1".to_string(),
            kind: "RateLimit".to_string(),
        },
        namespace: Some(NS.to_string()),
        name: name.to_string(),
        json: serde_json::to_vec(&json).expect("policy must encode"),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn unregistered_hooks_are_not_called() {
    let (translation, calls) = translate_with(FakeHooks::default(), &mk_web_snapshot()).await;
    assert!(translation.error.is_none());
    assert!(translation.resources.is_some());
    assert!(calls.is_empty(), "{calls:?}");
}

#[tokio::test(flavor = "current_thread")]
async fn route_hook_replaces_route() {
    let replaced = serde_json::json!({ "name": "httproute/ns-1/web", "replaced": true });
    let hooks = FakeHooks::default().on(HookPoint::Route, Behavior::Replace(replaced.clone()));
    let (translation, calls) = translate_with(hooks, &mk_web_snapshot()).await;

    assert!(translation.error.is_none());
    let resources = translation.resources.expect("resources must be published");
    assert_eq!(
        body(&resources, ResourceType::Route, "httproute/ns-1/web"),
        replaced
    );
    assert_eq!(
        calls,
        vec![Call::Route(
            "httproute/ns-1/web".to_string(),
            RouteContext {
                hostnames: vec!["web.example.com".to_string()],
                extension_resources: vec![],
            },
        )]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn removed_route_is_not_served() {
    let hooks = FakeHooks::default().on(HookPoint::Route, Behavior::Remove);
    let (translation, _) = translate_with(hooks, &mk_web_snapshot()).await;

    let resources = translation.resources.expect("resources must be published");
    assert!(names(&resources, ResourceType::Route).is_empty());
    let listener = body(&resources, ResourceType::Listener, "ns-1/gw/http");
    assert!(listener.get("virtualHosts").is_none(), "{listener}");
}

#[tokio::test(flavor = "current_thread")]
async fn virtual_host_hook_sees_listener_and_hostname() {
    let hooks = FakeHooks::default().on(HookPoint::VirtualHost, Behavior::Unchanged);
    let (translation, calls) = translate_with(hooks, &mk_web_snapshot()).await;

    assert!(translation.error.is_none());
    assert_eq!(
        calls,
        vec![Call::VirtualHost(
            "ns-1/gw/http/web.example.com".to_string(),
            VirtualHostContext {
                listener: "ns-1/gw/http".to_string(),
                hostname: "web.example.com".to_string(),
            },
        )]
    );
    let resources = translation.resources.expect("resources must be published");
    assert_eq!(
        body(&resources, ResourceType::Listener, "ns-1/gw/http")["virtualHosts"][0]["routes"],
        serde_json::json!(["httproute/ns-1/web"])
    );
}

#[tokio::test(flavor = "current_thread")]
async fn listener_hook_receives_policies_targeting_it() {
    let mut snapshot = mk_web_snapshot();
    for (name, section) in [("limit-http", "http"), ("limit-admin", "admin")] {
        let policy = mk_extension_policy(name, section);
        let oref = ObjectRef::new(Kind::Extension(policy.kind.clone()), NS, name);
        snapshot.extension_policies.insert(oref, policy);
    }
    let hooks = FakeHooks::default().on(HookPoint::Listener, Behavior::Unchanged);
    let (translation, calls) = translate_with(hooks, &snapshot).await;

    assert!(translation.error.is_none());
    assert_eq!(
        calls,
        vec![Call::Listener(
            "ns-1/gw/http".to_string(),
            ListenerContext {
                extension_resources: vec![mk_extension_policy("limit-http", "http")],
            },
        )]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn fail_closed_hook_aborts_translation() {
    let hooks = FakeHooks::default().on(HookPoint::Listener, Behavior::Fail);
    let (translation, _) = translate_with(hooks, &mk_web_snapshot()).await;

    assert!(translation.resources.is_none());
    assert!(
        matches!(
            translation.error,
            Some(TranslateError::Hook(HookError::Failed {
                point: HookPoint::Listener,
                ..
            }))
        ),
        "{:?}",
        translation.error
    );
}

#[tokio::test(flavor = "current_thread")]
async fn fail_open_hook_keeps_original() {
    let hooks = FakeHooks::default()
        .on(HookPoint::Route, Behavior::Fail)
        .failing_open();
    let (translation, _) = translate_with(hooks, &mk_web_snapshot()).await;

    assert!(translation.error.is_none());
    let resources = translation.resources.expect("resources must be published");
    assert_eq!(
        body(&resources, ResourceType::Route, "httproute/ns-1/web")["kind"],
        "HTTPRoute"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_replacement_is_a_hook_failure() {
    let hooks = FakeHooks::default().on(HookPoint::VirtualHost, Behavior::Malformed);
    let (translation, _) = translate_with(hooks, &mk_web_snapshot()).await;
    assert!(translation.resources.is_none());
    assert!(
        matches!(
            translation.error,
            Some(TranslateError::Hook(HookError::Malformed(HookPoint::VirtualHost)))
        ),
        "{:?}",
        translation.error
    );

    let hooks = FakeHooks::default()
        .on(HookPoint::VirtualHost, Behavior::Malformed)
        .failing_open();
    let (translation, _) = translate_with(hooks, &mk_web_snapshot()).await;
    assert!(translation.error.is_none());
    let resources = translation.resources.expect("resources must be published");
    assert_eq!(
        body(&resources, ResourceType::Listener, "ns-1/gw/http")["virtualHosts"][0]["hostname"],
        "web.example.com"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn translation_hook_replaces_clusters() {
    let mut snapshot = mk_web_snapshot();
    let policy = mk_extension_policy("limit-http", "http");
    snapshot.extension_policies.insert(
        ObjectRef::new(Kind::Extension(policy.kind.clone()), NS, "limit-http"),
        policy.clone(),
    );
    let cluster = serde_json::json!({ "name": "extension/cluster" });
    let hooks = FakeHooks::default().on(HookPoint::Translation, Behavior::Replace(cluster.clone()));
    let (translation, calls) = translate_with(hooks, &snapshot).await;

    assert!(translation.error.is_none());
    assert_eq!(
        calls,
        vec![Call::Translation {
            clusters: vec!["service/ns-1/web".to_string()],
            policies: vec![policy],
        }]
    );
    let resources = translation.resources.expect("resources must be published");
    assert_eq!(
        names(&resources, ResourceType::Cluster),
        vec!["extension/cluster"]
    );
    assert_eq!(
        body(&resources, ResourceType::Cluster, "extension/cluster"),
        cluster
    );
}

#[tokio::test(flavor = "current_thread")]
async fn translation_hook_may_remove_everything() {
    let hooks = FakeHooks::default().on(HookPoint::Translation, Behavior::Remove);
    let (translation, _) = translate_with(hooks, &mk_web_snapshot()).await;

    let resources = translation.resources.expect("resources must be published");
    assert!(names(&resources, ResourceType::Cluster).is_empty());
    assert_eq!(names(&resources, ResourceType::Route), vec!["httproute/ns-1/web"]);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_translation_hook_fails_open_or_closed() {
    let hooks = FakeHooks::default().on(HookPoint::Translation, Behavior::Fail);
    let (translation, _) = translate_with(hooks, &mk_web_snapshot()).await;
    assert!(matches!(
        translation.error,
        Some(TranslateError::Hook(HookError::Timeout(HookPoint::Translation)))
    ));

    let hooks = FakeHooks::default()
        .on(HookPoint::Translation, Behavior::Malformed)
        .failing_open();
    let (translation, _) = translate_with(hooks, &mk_web_snapshot()).await;
    assert!(translation.error.is_none());
    let resources = translation.resources.expect("resources must be published");
    assert_eq!(
        names(&resources, ResourceType::Cluster),
        vec!["service/ns-1/web"]
    );
}
