use super::*;
use crate::merge::{is_same, merge};
use pretty_assertions::assert_eq;
use rstest::rstest;
use switchyard_controller_k8s_api::{
    gateway::{GatewayClassStatus, GatewayStatus, ListenerStatus},
    policy::{PolicyAncestorStatus, PolicyStatus},
};

fn now() -> Time {
    mk_time(1_000)
}

#[test]
fn foreign_entries_are_preserved() {
    let theirs = route_entry(OTHER, "gw", vec![accepted(true, mk_time(5))]);
    let live = route_status(vec![
        theirs.clone(),
        route_entry(CONTROLLER, "gw", vec![accepted(false, mk_time(10))]),
    ]);

    let merged = merge(
        CONTROLLER,
        live,
        &derived_parents(vec![parent_status("gw", true)], vec![]),
        &now(),
    )
    .unwrap();
    assert_eq!(
        merged,
        route_status(vec![
            theirs,
            route_entry(CONTROLLER, "gw", vec![accepted(true, now())]),
        ])
    );
}

#[test]
fn unchanged_conditions_keep_their_transition_time() {
    let live = route_status(vec![route_entry(
        CONTROLLER,
        "gw",
        vec![
            accepted(true, mk_time(100)),
            mk_condition("ResolvedRefs", true, "ResolvedRefs", mk_time(100)),
        ],
    )]);
    let derived = derived_parents(
        vec![ParentStatus {
            parent_ref: gateway_ref("gw"),
            conditions: vec![
                accepted(true, derived_time()),
                mk_condition("ResolvedRefs", false, "BackendNotFound", derived_time()),
            ],
        }],
        vec![],
    );

    let merged = merge(CONTROLLER, live, &derived, &now()).unwrap();
    assert_eq!(
        merged,
        route_status(vec![route_entry(
            CONTROLLER,
            "gw",
            vec![
                accepted(true, mk_time(100)),
                mk_condition("ResolvedRefs", false, "BackendNotFound", now()),
            ],
        )])
    );
}

#[test]
fn new_parents_are_appended() {
    let theirs = route_entry(OTHER, "gw-a", vec![accepted(true, mk_time(5))]);
    let merged = merge(
        CONTROLLER,
        route_status(vec![theirs.clone()]),
        &derived_parents(vec![parent_status("gw-b", true)], vec![]),
        &now(),
    )
    .unwrap();
    assert_eq!(
        merged,
        route_status(vec![
            theirs,
            route_entry(CONTROLLER, "gw-b", vec![accepted(true, now())]),
        ])
    );
}

#[test]
fn superseded_entries_are_pruned_only_for_this_controller() {
    let theirs = route_entry(OTHER, "gw-a", vec![accepted(true, mk_time(5))]);
    let live = route_status(vec![
        theirs.clone(),
        route_entry(CONTROLLER, "gw-a", vec![accepted(true, mk_time(5))]),
        route_entry(CONTROLLER, "gw-b", vec![accepted(true, mk_time(5))]),
    ]);

    let merged = merge(
        CONTROLLER,
        live,
        &derived_parents(vec![parent_status("gw-b", true)], vec![gateway_ref("gw-a")]),
        &now(),
    )
    .unwrap();
    assert_eq!(
        merged,
        route_status(vec![
            theirs,
            route_entry(CONTROLLER, "gw-b", vec![accepted(true, mk_time(5))]),
        ])
    );
}

#[test]
fn omitted_entries_are_left_in_place() {
    let live = route_status(vec![route_entry(
        CONTROLLER,
        "gw",
        vec![accepted(true, mk_time(5))],
    )]);
    let merged = merge(
        CONTROLLER,
        live.clone(),
        &derived_parents(vec![], vec![]),
        &now(),
    )
    .unwrap();
    assert_eq!(merged, live);
}

#[test]
fn detached_route_leaves_foreign_entries() {
    let live = route_status(vec![route_entry(
        OTHER,
        "gw",
        vec![accepted(true, mk_time(5))],
    )]);
    let merged = merge(
        CONTROLLER,
        live.clone(),
        &derived_parents(vec![], vec![gateway_ref("gw")]),
        &now(),
    )
    .unwrap();
    assert_eq!(merged, live);
}

#[test]
fn policy_ancestors_merge_by_controller() {
    let theirs = PolicyAncestorStatus {
        ancestor_ref: gateway_ref("gw"),
        controller_name: OTHER.to_string(),
        conditions: vec![accepted(true, mk_time(5))],
    };
    let live = Status::Policy(PolicyStatus {
        ancestors: vec![theirs.clone()],
    });

    let merged = merge(
        CONTROLLER,
        live,
        &derived_parents(vec![parent_status("gw", false)], vec![]),
        &now(),
    )
    .unwrap();
    assert_eq!(
        merged,
        Status::Policy(PolicyStatus {
            ancestors: vec![
                theirs,
                PolicyAncestorStatus {
                    ancestor_ref: gateway_ref("gw"),
                    controller_name: CONTROLLER.to_string(),
                    conditions: vec![accepted(false, now())],
                },
            ],
        })
    );
}

#[test]
fn listener_times_carry_over_by_name() {
    let listener = |name: &str, time: Time| ListenerStatus {
        name: name.to_string(),
        supported_kinds: Vec::new(),
        attached_routes: 1,
        conditions: vec![mk_condition("Programmed", true, "Programmed", time)],
    };
    let live = Status::Gateway(GatewayStatus {
        addresses: None,
        conditions: Some(vec![accepted(true, mk_time(7))]),
        listeners: Some(vec![listener("http", mk_time(7))]),
    });
    let derived = DerivedStatus::Gateway(GatewayStatus {
        addresses: None,
        conditions: Some(vec![accepted(true, derived_time())]),
        listeners: Some(vec![
            listener("http", derived_time()),
            listener("https", derived_time()),
        ]),
    });

    let merged = merge(CONTROLLER, live, &derived, &now()).unwrap();
    assert_eq!(
        merged,
        Status::Gateway(GatewayStatus {
            addresses: None,
            conditions: Some(vec![accepted(true, mk_time(7))]),
            listeners: Some(vec![listener("http", mk_time(7)), listener("https", now())]),
        })
    );
}

#[test]
fn class_conditions_are_replaced() {
    let live = Status::GatewayClass(GatewayClassStatus {
        conditions: Some(vec![
            accepted(false, mk_time(3)),
            mk_condition("SupportedVersion", true, "SupportedVersion", mk_time(3)),
        ]),
    });
    let merged = merge(
        CONTROLLER,
        live,
        &DerivedStatus::GatewayClass(vec![accepted(true, derived_time())]),
        &now(),
    )
    .unwrap();
    assert_eq!(
        merged,
        Status::GatewayClass(GatewayClassStatus {
            conditions: Some(vec![accepted(true, now())]),
        })
    );
}

#[test]
fn mismatched_shapes_do_not_merge() {
    let derived = DerivedStatus::GatewayClass(vec![accepted(true, derived_time())]);
    assert_eq!(
        merge(CONTROLLER, Status::empty(StatusKind::Gateway), &derived, &now()),
        None
    );
}

#[test]
fn sameness_ignores_transition_times() {
    let a = route_status(vec![route_entry(
        CONTROLLER,
        "gw",
        vec![accepted(true, mk_time(1))],
    )]);
    let b = route_status(vec![route_entry(
        CONTROLLER,
        "gw",
        vec![accepted(true, mk_time(2))],
    )]);
    assert!(is_same(&a, &b));

    let mut changed = accepted(true, mk_time(1));
    changed.message = "Route was accepted".to_string();
    let c = route_status(vec![route_entry(CONTROLLER, "gw", vec![changed])]);
    assert!(!is_same(&a, &c));
}

#[rstest]
#[case(StatusKind::GatewayClass)]
#[case(StatusKind::Gateway)]
#[case(StatusKind::HttpRoute)]
#[case(StatusKind::TcpRoute)]
#[case(StatusKind::SecurityPolicy)]
fn empty_status_decodes_for_every_shape(#[case] kind: StatusKind) {
    let status = Status::decode(kind, serde_json::json!({})).unwrap();
    assert_eq!(status, Status::empty(kind));
}
