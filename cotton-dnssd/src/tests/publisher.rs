use super::*;
use crate::daemon::MockDaemon;
use crate::DaemonError;
use mockall::predicate::eq;
use mockall::Sequence;
use slotmap::SlotMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Default, Clone)]
struct FakeCallback {
    calls: Arc<Mutex<Vec<Event>>>,
}

impl FakeCallback {
    fn events(&self) -> Vec<Event> {
        self.calls.lock().unwrap().clone()
    }

    fn established(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Established { name } => Some(name),
                _ => None,
            })
            .collect()
    }

    fn renames(&self) -> Vec<(String, String, CollisionKind)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Renamed { from, to, cause } => Some((from, to, cause)),
                _ => None,
            })
            .collect()
    }

    fn failure(&self) -> Option<Error> {
        self.events().into_iter().find_map(|e| match e {
            Event::Failed { error, .. } => Some(error),
            _ => None,
        })
    }

    fn no_events(&self) -> bool {
        self.calls.lock().unwrap().is_empty()
    }

    fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Callback for FakeCallback {
    fn on_event(&self, event: &Event) {
        self.calls.lock().unwrap().push(event.clone());
    }
}

struct Keys {
    publisher: PublisherKey,
    connection: ConnectionKey,
    group: GroupKey,
    other_group: GroupKey,
}

fn keys() -> Keys {
    let mut p = SlotMap::<PublisherKey, ()>::with_key();
    let mut c = SlotMap::<ConnectionKey, ()>::with_key();
    let mut g = SlotMap::<GroupKey, ()>::with_key();
    Keys {
        publisher: p.insert(()),
        connection: c.insert(()),
        group: g.insert(()),
        other_group: g.insert(()),
    }
}

fn printer() -> ServiceInfo {
    ServiceInfo::new("printer", "_ipp._tcp", "loc=lab", 631).unwrap()
}

/// A publisher that has connected, but not yet heard anything back
fn connected(k: &Keys) -> (Publisher<FakeCallback>, FakeCallback) {
    let c = FakeCallback::default();
    let mut p = Publisher::new(printer(), c.clone());
    let mut d = MockDaemon::new();
    let connection = k.connection;
    d.expect_connect()
        .with(eq(k.publisher))
        .times(1)
        .returning(move |_| Ok(connection));
    p.open(k.publisher, &mut d).unwrap();
    (p, c)
}

/// Expect one clean create/add/commit cycle
fn expect_publish(d: &mut MockDaemon, k: &Keys) {
    let group = k.group;
    d.expect_new_group()
        .with(eq(k.connection))
        .times(1)
        .returning(move |_| Ok(group));
    d.expect_is_empty().with(eq(k.group)).return_const(true);
    d.expect_add_service()
        .times(1)
        .returning(|_, _| Ok(()));
    d.expect_commit()
        .with(eq(k.group))
        .times(1)
        .returning(|_| Ok(()));
}

/// A publisher whose group has been committed
fn committed(k: &Keys) -> (Publisher<FakeCallback>, FakeCallback) {
    let (mut p, c) = connected(k);
    let mut d = MockDaemon::new();
    expect_publish(&mut d, k);
    p.on_client_state(ClientState::Running, &mut d).unwrap();
    c.clear();
    (p, c)
}

/* ==== Tests for open ==== */

#[test]
fn open_failure_is_connection_error() {
    let k = keys();
    let c = FakeCallback::default();
    let mut p = Publisher::new(printer(), c.clone());
    let mut d = MockDaemon::new();
    d.expect_connect()
        .times(1)
        .returning(|_| Err(DaemonError::Unreachable));
    assert_eq!(
        p.open(k.publisher, &mut d),
        Err(Error::Connection(DaemonError::Unreachable))
    );
    assert!(c.no_events());
}

/* ==== Tests for client state changes ==== */

#[test]
fn running_creates_and_commits() {
    let k = keys();
    let (mut p, c) = connected(&k);
    let mut d = MockDaemon::new();
    expect_publish(&mut d, &k);

    p.on_client_state(ClientState::Running, &mut d).unwrap();

    assert_eq!(*p.state(), PublisherState::Committed);
    assert_eq!(p.group(), Some(k.group));
    assert_eq!(
        c.events(),
        vec![Event::Adding {
            name: "printer".to_string()
        }]
    );
}

#[test]
fn established_with_original_name() {
    let k = keys();
    let (mut p, c) = committed(&k);
    let mut d = MockDaemon::new();

    p.on_group_state(k.group, GroupState::Registering, &mut d)
        .unwrap();
    p.on_group_state(k.group, GroupState::Established, &mut d)
        .unwrap();

    assert_eq!(*p.state(), PublisherState::Established);
    assert_eq!(c.established(), vec!["printer".to_string()]);
    assert!(c.renames().is_empty());
}

#[test]
fn running_with_populated_group_does_nothing() {
    let k = keys();
    let (mut p, _c) = committed(&k);
    let mut d = MockDaemon::new();
    d.expect_is_empty().return_const(false);

    p.on_client_state(ClientState::Running, &mut d).unwrap();

    assert_eq!(*p.state(), PublisherState::Committed);
}

#[test]
fn connecting_does_nothing() {
    let k = keys();
    let (mut p, c) = connected(&k);
    let mut d = MockDaemon::new();

    p.on_client_state(ClientState::Connecting, &mut d).unwrap();

    assert_eq!(*p.state(), PublisherState::Connecting);
    assert!(c.no_events());
}

#[test]
fn server_collision_withdraws_records() {
    let k = keys();
    let (mut p, c) = committed(&k);
    let mut d = MockDaemon::new();
    d.expect_reset().with(eq(k.group)).times(1).return_const(());

    p.on_client_state(ClientState::Collision, &mut d).unwrap();

    assert_eq!(*p.state(), PublisherState::Suspended);
    assert_eq!(p.group(), Some(k.group));
    assert_eq!(
        c.events(),
        vec![Event::Withdrawn {
            name: "printer".to_string()
        }]
    );
}

#[test]
fn server_registering_without_group_does_nothing() {
    let k = keys();
    let (mut p, c) = connected(&k);
    let mut d = MockDaemon::new();

    p.on_client_state(ClientState::Registering, &mut d).unwrap();

    assert_eq!(*p.state(), PublisherState::Connecting);
    assert!(c.no_events());
}

#[test]
fn records_restored_when_server_running_again() {
    let k = keys();
    let (mut p, c) = committed(&k);
    let mut d = MockDaemon::new();
    d.expect_reset().return_const(());
    p.on_client_state(ClientState::Registering, &mut d).unwrap();

    // Group is kept, so no new_group this time
    let mut d = MockDaemon::new();
    d.expect_is_empty().return_const(true);
    d.expect_add_service().times(1).returning(|_, _| Ok(()));
    d.expect_commit().times(1).returning(|_| Ok(()));
    p.on_client_state(ClientState::Running, &mut d).unwrap();

    assert_eq!(*p.state(), PublisherState::Committed);
    assert!(matches!(c.events().last(), Some(Event::Adding { .. })));
}

#[test]
fn client_failure_is_fatal_without_rollback() {
    let k = keys();
    let (mut p, c) = committed(&k);
    let mut d = MockDaemon::new();

    let r = p.on_client_state(
        ClientState::Failure(DaemonError::Disconnected),
        &mut d,
    );

    let e = Error::Connection(DaemonError::Disconnected);
    assert_eq!(r, Err(e.clone()));
    assert_eq!(*p.state(), PublisherState::Failed(e.clone()));
    assert_eq!(c.failure(), Some(e));
}

/* ==== Tests for local collisions ==== */

#[test]
fn one_local_collision_renames_once() {
    let k = keys();
    let (mut p, c) = connected(&k);
    let mut d = MockDaemon::new();
    let group = k.group;
    let mut seq = Sequence::new();
    d.expect_new_group().returning(move |_| Ok(group));
    d.expect_is_empty().return_const(true);
    d.expect_add_service()
        .withf(|_, s| s.name() == "printer")
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(AddServiceError::Collision));
    d.expect_reset()
        .with(eq(k.group))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(());
    d.expect_add_service()
        .withf(|_, s| s.name() == "printer #2")
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    d.expect_commit()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));

    p.on_client_state(ClientState::Running, &mut d).unwrap();
    p.on_group_state(k.group, GroupState::Established, &mut d)
        .unwrap();

    assert_eq!(
        c.renames(),
        vec![(
            "printer".to_string(),
            "printer #2".to_string(),
            CollisionKind::Local
        )]
    );
    assert_eq!(c.established(), vec!["printer #2".to_string()]);
    assert_eq!(p.service().name(), "printer #2");
    assert_eq!(p.service().port(), 631);
}

#[test]
fn long_local_collision_run_terminates_with_distinct_names() {
    const COLLISIONS: usize = 500;
    let k = keys();
    let (mut p, c) = connected(&k);
    let mut d = MockDaemon::new();
    let group = k.group;
    d.expect_new_group().returning(move |_| Ok(group));
    d.expect_is_empty().return_const(true);
    let tried = Arc::new(Mutex::new(Vec::new()));
    let tried2 = tried.clone();
    d.expect_add_service().returning(move |_, s| {
        let mut tried = tried2.lock().unwrap();
        tried.push(s.name().to_string());
        if tried.len() <= COLLISIONS {
            Err(AddServiceError::Collision)
        } else {
            Ok(())
        }
    });
    d.expect_reset().times(COLLISIONS).return_const(());
    d.expect_commit().times(1).returning(|_| Ok(()));

    p.on_client_state(ClientState::Running, &mut d).unwrap();

    let tried = tried.lock().unwrap();
    assert_eq!(tried.len(), COLLISIONS + 1);
    let distinct: HashSet<&String> = tried.iter().collect();
    assert_eq!(distinct.len(), tried.len());
    assert_eq!(c.renames().len(), COLLISIONS);
    assert_eq!(p.service().name(), tried.last().unwrap().as_str());
    assert_eq!(*p.state(), PublisherState::Committed);
}

/* ==== Tests for fatal errors ==== */

#[test]
fn group_creation_failure_is_fatal() {
    let k = keys();
    let (mut p, c) = connected(&k);
    let mut d = MockDaemon::new();
    d.expect_new_group()
        .returning(|_| Err(DaemonError::ResourceExhausted));

    let r = p.on_client_state(ClientState::Running, &mut d);

    let e = Error::GroupCreation(DaemonError::ResourceExhausted);
    assert_eq!(r, Err(e.clone()));
    assert_eq!(p.group(), None);
    assert_eq!(c.failure(), Some(e));
}

#[test]
fn add_failure_rolls_back_then_fails() {
    let k = keys();
    let (mut p, c) = connected(&k);
    let mut d = MockDaemon::new();
    let group = k.group;
    d.expect_new_group().returning(move |_| Ok(group));
    d.expect_is_empty().return_const(true);
    d.expect_add_service().times(1).returning(|_, _| {
        Err(AddServiceError::Other(DaemonError::InvalidServiceType))
    });
    d.expect_reset().with(eq(k.group)).times(1).return_const(());
    d.expect_commit().never();

    let r = p.on_client_state(ClientState::Running, &mut d);

    let e = Error::ServiceRegistration(DaemonError::InvalidServiceType);
    assert_eq!(r, Err(e.clone()));
    assert_eq!(*p.state(), PublisherState::Failed(e.clone()));
    assert_eq!(c.failure(), Some(e));
    // Handles kept until close
    assert_eq!(p.group(), Some(k.group));
}

#[test]
fn commit_failure_rolls_back_then_fails() {
    let k = keys();
    let (mut p, c) = connected(&k);
    let mut d = MockDaemon::new();
    let group = k.group;
    let mut seq = Sequence::new();
    d.expect_new_group().returning(move |_| Ok(group));
    d.expect_is_empty().return_const(true);
    d.expect_add_service().returning(|_, _| Ok(()));
    d.expect_commit()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(DaemonError::BadState));
    d.expect_reset()
        .times(1)
        .in_sequence(&mut seq)
        .return_const(());

    let r = p.on_client_state(ClientState::Running, &mut d);

    assert_eq!(r, Err(Error::Commit(DaemonError::BadState)));
    assert_eq!(c.failure(), Some(Error::Commit(DaemonError::BadState)));
}

#[test]
fn group_failure_rolls_back_then_fails() {
    let k = keys();
    let (mut p, c) = committed(&k);
    let mut d = MockDaemon::new();
    d.expect_reset().with(eq(k.group)).times(1).return_const(());

    let r = p.on_group_state(
        k.group,
        GroupState::Failure(DaemonError::Disconnected),
        &mut d,
    );

    let e = Error::GroupFailure(DaemonError::Disconnected);
    assert_eq!(r, Err(e.clone()));
    assert_eq!(c.failure(), Some(e));
}

#[test]
fn failed_publisher_ignores_everything() {
    let k = keys();
    let (mut p, c) = committed(&k);
    let mut d = MockDaemon::new();
    d.expect_reset().return_const(());
    let _ = p.on_group_state(
        k.group,
        GroupState::Failure(DaemonError::Disconnected),
        &mut d,
    );
    c.clear();

    // No expectations: any daemon call would panic
    let mut d = MockDaemon::new();
    p.on_client_state(ClientState::Running, &mut d).unwrap();
    p.on_group_state(k.group, GroupState::Established, &mut d)
        .unwrap();
    p.on_group_state(k.group, GroupState::Collision, &mut d)
        .unwrap();

    assert!(c.no_events());
    assert!(matches!(p.state(), PublisherState::Failed(_)));
}

/* ==== Tests for group state changes ==== */

#[test]
fn foreign_group_notification_ignored() {
    let k = keys();
    let (mut p, c) = committed(&k);
    let mut d = MockDaemon::new();

    p.on_group_state(k.other_group, GroupState::Established, &mut d)
        .unwrap();
    p.on_group_state(k.other_group, GroupState::Collision, &mut d)
        .unwrap();
    p.on_group_state(
        k.other_group,
        GroupState::Failure(DaemonError::BadState),
        &mut d,
    )
    .unwrap();

    assert_eq!(*p.state(), PublisherState::Committed);
    assert_eq!(p.group(), Some(k.group));
    assert_eq!(p.service().name(), "printer");
    assert!(c.no_events());
}

#[test]
fn unassigned_group_adopts_notifier() {
    let k = keys();
    let (mut p, c) = connected(&k);
    let mut d = MockDaemon::new();

    p.on_group_state(k.group, GroupState::Uncommitted, &mut d)
        .unwrap();

    assert_eq!(p.group(), Some(k.group));
    assert!(c.no_events());

    // Now owned, so the other group is foreign
    p.on_group_state(k.other_group, GroupState::Established, &mut d)
        .unwrap();
    assert!(c.no_events());
}

#[test]
fn remote_collision_renames_and_republishes() {
    let k = keys();
    let (mut p, c) = committed(&k);
    let mut d = MockDaemon::new();
    let mut seq = Sequence::new();
    d.expect_reset()
        .with(eq(k.group))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(());
    d.expect_is_empty().return_const(true);
    d.expect_add_service()
        .withf(|_, s| s.name() == "printer #2")
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(()));
    d.expect_commit()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));

    p.on_group_state(k.group, GroupState::Collision, &mut d)
        .unwrap();
    p.on_group_state(k.group, GroupState::Established, &mut d)
        .unwrap();

    assert_eq!(
        c.renames(),
        vec![(
            "printer".to_string(),
            "printer #2".to_string(),
            CollisionKind::Remote
        )]
    );
    assert_eq!(c.established(), vec!["printer #2".to_string()]);
}

#[test]
fn transient_group_states_do_nothing() {
    let k = keys();
    let (mut p, c) = committed(&k);
    let mut d = MockDaemon::new();

    p.on_group_state(k.group, GroupState::Uncommitted, &mut d)
        .unwrap();
    p.on_group_state(k.group, GroupState::Registering, &mut d)
        .unwrap();

    assert_eq!(*p.state(), PublisherState::Committed);
    assert!(c.no_events());
}

/* ==== Tests for close ==== */

#[test]
fn close_releases_group_before_connection() {
    let k = keys();
    let (mut p, _c) = committed(&k);
    let mut d = MockDaemon::new();
    let mut seq = Sequence::new();
    d.expect_reset()
        .with(eq(k.group))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(());
    d.expect_free_group()
        .with(eq(k.group))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(());
    d.expect_disconnect()
        .with(eq(k.connection))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(());

    p.close(&mut d);
    assert_eq!(*p.state(), PublisherState::Removed);

    // Second close makes no calls at all
    p.close(&mut d);
    assert_eq!(p.group(), None);
}

#[test]
fn close_before_any_group() {
    let k = keys();
    let (mut p, _c) = connected(&k);
    let mut d = MockDaemon::new();
    d.expect_reset().never();
    d.expect_free_group().never();
    d.expect_disconnect()
        .with(eq(k.connection))
        .times(1)
        .return_const(());

    p.close(&mut d);
}

#[test]
fn closed_publisher_ignores_notifications() {
    let k = keys();
    let (mut p, c) = committed(&k);
    let mut d = MockDaemon::new();
    d.expect_reset().return_const(());
    d.expect_free_group().return_const(());
    d.expect_disconnect().return_const(());
    p.close(&mut d);

    let mut d = MockDaemon::new();
    p.on_group_state(k.group, GroupState::Established, &mut d)
        .unwrap();
    p.on_client_state(ClientState::Running, &mut d).unwrap();
    assert!(c.no_events());
    assert_eq!(*p.state(), PublisherState::Removed);
}
