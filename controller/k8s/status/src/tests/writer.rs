use super::*;
use crate::{metrics::UpdateResult, StatusWriter};
use pretty_assertions::assert_eq;
use std::time::Duration;
use switchyard_controller_k8s_index::{DerivedStatuses, StatusKey};
use tokio::time;

const KIND: StatusKind = StatusKind::HttpRoute;

fn route_id() -> ObjectId {
    ObjectId::new("ns-1", "web")
}

fn route_key() -> StatusKey {
    StatusKey {
        controller: CONTROLLER.to_string(),
        id: route_id(),
    }
}

fn mk_writer(
    client: &FakeClient,
    lease: Lease,
) -> (StatusWriter<FakeClient>, Arc<DerivedStatuses>, Metrics) {
    let statuses = Arc::new(DerivedStatuses::default());
    let metrics = metrics();
    let writer = StatusWriter::new(
        KIND,
        client.clone(),
        statuses.clone(),
        lease,
        Duration::from_secs(5),
        metrics.clone(),
    );
    (writer, statuses, metrics)
}

fn foreign_route() -> LiveObject {
    live(
        "1",
        Some(route_status(vec![route_entry(
            OTHER,
            "gw",
            vec![accepted(true, mk_time(5))],
        )])),
    )
}

fn count(metrics: &Metrics, result: UpdateResult) -> u64 {
    metrics.count(KIND.as_str(), result)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn writes_merged_status() {
    let client = FakeClient::default();
    client.insert(KIND, route_id(), foreign_route());
    let (_claims, lease) = lease(CLAIMANT);
    let (writer, _, metrics) = mk_writer(&client, lease);

    writer
        .write(route_key(), derived_parents(vec![parent_status("gw", true)], vec![]))
        .await;

    let obj = client.object(KIND, &route_id()).unwrap();
    assert_eq!(obj.resource_version.as_deref(), Some("2"));
    assert_eq!(
        obj.status,
        Some(route_status(vec![
            route_entry(OTHER, "gw", vec![accepted(true, mk_time(5))]),
            route_entry(CONTROLLER, "gw", vec![accepted(true, written_time())]),
        ]))
    );
    assert_eq!(count(&metrics, UpdateResult::Success), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unchanged_status_is_not_written() {
    let client = FakeClient::default();
    client.insert(
        KIND,
        route_id(),
        live(
            "4",
            Some(route_status(vec![route_entry(
                CONTROLLER,
                "gw",
                vec![accepted(true, mk_time(5))],
            )])),
        ),
    );
    let (_claims, lease) = lease(CLAIMANT);
    let (writer, _, metrics) = mk_writer(&client, lease);

    writer
        .write(route_key(), derived_parents(vec![parent_status("gw", true)], vec![]))
        .await;
    assert_eq!(client.attempts(), 0);
    assert_eq!(count(&metrics, UpdateResult::NoAction), 1);
    assert_eq!(count(&metrics, UpdateResult::Success), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn conflicts_are_retried_against_the_refetched_object() {
    let client = FakeClient::default();
    client.insert(KIND, route_id(), foreign_route());
    client.set_conflicts(2);
    let (_claims, lease) = lease(CLAIMANT);
    let (writer, _, metrics) = mk_writer(&client, lease);

    writer
        .write(route_key(), derived_parents(vec![parent_status("gw", true)], vec![]))
        .await;

    assert_eq!(client.attempts(), 3);
    assert_eq!(client.writes(), 1);
    assert_eq!(count(&metrics, UpdateResult::Conflict), 2);
    assert_eq!(count(&metrics, UpdateResult::Success), 1);
    // Two conflicting writers and this one.
    let obj = client.object(KIND, &route_id()).unwrap();
    assert_eq!(obj.resource_version.as_deref(), Some("4"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn conflicts_give_up_after_four_attempts() {
    let client = FakeClient::default();
    client.insert(KIND, route_id(), foreign_route());
    client.set_conflicts(10);
    let (_claims, lease) = lease(CLAIMANT);
    let (writer, _, metrics) = mk_writer(&client, lease);

    let start = time::Instant::now();
    writer
        .write(route_key(), derived_parents(vec![parent_status("gw", true)], vec![]))
        .await;

    assert_eq!(client.attempts(), 4);
    assert_eq!(client.writes(), 0);
    assert_eq!(count(&metrics, UpdateResult::Conflict), 4);
    assert_eq!(count(&metrics, UpdateResult::Error), 1);
    // 10ms + 50ms + 250ms, each within 10%.
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(279), "{waited:?}");
    assert!(waited <= Duration::from_millis(345), "{waited:?}");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn missing_objects_are_skipped() {
    let client = FakeClient::default();
    let (_claims, lease) = lease(CLAIMANT);
    let (writer, _, metrics) = mk_writer(&client, lease);

    writer
        .write(route_key(), derived_parents(vec![parent_status("gw", true)], vec![]))
        .await;
    assert_eq!(client.attempts(), 0);
    for result in [
        UpdateResult::Success,
        UpdateResult::NoAction,
        UpdateResult::Conflict,
        UpdateResult::Error,
    ] {
        assert_eq!(count(&metrics, result), 0);
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn other_errors_are_not_retried() {
    let client = FakeClient::default();
    client.insert(KIND, route_id(), foreign_route());
    client.set_fail(500);
    let (_claims, lease) = lease(CLAIMANT);
    let (writer, _, metrics) = mk_writer(&client, lease);

    writer
        .write(route_key(), derived_parents(vec![parent_status("gw", true)], vec![]))
        .await;
    assert_eq!(client.attempts(), 1);
    assert_eq!(count(&metrics, UpdateResult::Conflict), 0);
    assert_eq!(count(&metrics, UpdateResult::Error), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn writes_wait_for_the_lease() {
    let client = FakeClient::default();
    client.insert(KIND, route_id(), foreign_route());
    let (claims, lease) = lease("switchyard-1");
    let (writer, statuses, metrics) = mk_writer(&client, lease);
    let (shutdown_tx, shutdown_rx) = drain::channel();
    let task = tokio::spawn(writer.run(shutdown_rx));

    let store = statuses.get(KIND);
    store.store(route_key(), derived_parents(vec![parent_status("gw", false)], vec![]));
    store.store(route_key(), derived_parents(vec![parent_status("gw", true)], vec![]));
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.attempts(), 0);

    claims.send(mk_claim(CLAIMANT)).unwrap();
    time::sleep(Duration::from_secs(1)).await;
    // Only the latest status is written.
    assert_eq!(client.writes(), 1);
    assert_eq!(count(&metrics, UpdateResult::Success), 1);
    let obj = client.object(KIND, &route_id()).unwrap();
    assert_eq!(
        obj.status.unwrap(),
        route_status(vec![
            route_entry(OTHER, "gw", vec![accepted(true, mk_time(5))]),
            route_entry(CONTROLLER, "gw", vec![accepted(true, written_time())]),
        ])
    );

    shutdown_tx.drain().await;
    task.await.unwrap();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn status_derived_while_leading_is_written() {
    let client = FakeClient::default();
    client.insert(KIND, route_id(), foreign_route());
    let (_claims, lease) = lease(CLAIMANT);
    let (writer, statuses, _) = mk_writer(&client, lease);
    let (shutdown_tx, shutdown_rx) = drain::channel();
    let task = tokio::spawn(writer.run(shutdown_rx));

    statuses
        .get(KIND)
        .store(route_key(), derived_parents(vec![parent_status("gw", true)], vec![]));
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.writes(), 1);

    // Deriving the same status again changes nothing on the object.
    statuses
        .get(KIND)
        .store(route_key(), derived_parents(vec![parent_status("gw", true)], vec![]));
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.writes(), 1);

    shutdown_tx.drain().await;
    task.await.unwrap();
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn skipped_statuses_keep_their_parents_superseded() {
    let client = FakeClient::default();
    client.insert(
        KIND,
        route_id(),
        live(
            "1",
            Some(route_status(vec![
                route_entry(OTHER, "gw", vec![accepted(true, mk_time(5))]),
                route_entry(CONTROLLER, "gw", vec![accepted(true, mk_time(5))]),
            ])),
        ),
    );
    let (claims, lease) = lease("switchyard-1");
    let (writer, statuses, _) = mk_writer(&client, lease);
    let (shutdown_tx, shutdown_rx) = drain::channel();
    let task = tokio::spawn(writer.run(shutdown_rx));

    // The route moves twice before any status is written. Each status only
    // supersedes the parent of the one before it.
    let store = statuses.get(KIND);
    store.store(
        route_key(),
        derived_parents(vec![parent_status("gw2", true)], vec![gateway_ref("gw")]),
    );
    store.store(
        route_key(),
        derived_parents(vec![parent_status("gw3", true)], vec![gateway_ref("gw2")]),
    );
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.attempts(), 0);

    claims.send(mk_claim(CLAIMANT)).unwrap();
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(client.writes(), 1);
    let obj = client.object(KIND, &route_id()).unwrap();
    assert_eq!(
        obj.status.unwrap(),
        route_status(vec![
            route_entry(OTHER, "gw", vec![accepted(true, mk_time(5))]),
            route_entry(CONTROLLER, "gw3", vec![accepted(true, written_time())]),
        ])
    );

    shutdown_tx.drain().await;
    task.await.unwrap();
}
