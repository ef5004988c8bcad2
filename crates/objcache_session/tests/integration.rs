//! Integration tests for session endpoints against a real authority.

use objcache_authority::{
    AuthorityConfig, LoopbackTransport, Operation, Principal, RequestContext, RoleTable,
};
use objcache_core::{
    CacheEndpoint, CacheError, EventKind, IdOrRecord, QueryInput, Record, Value,
};
use objcache_protocol::{CacheTransport, PushSink, SessionId};
use objcache_session::{SessionCache, SessionConfig, SessionEndpoint};
use objcache_testkit::prelude::*;
use std::sync::Arc;

struct Client {
    session: Arc<SessionEndpoint>,
    id: SessionId,
}

impl Client {
    fn users(&self) -> Arc<SessionCache> {
        self.session.cache(USERS).unwrap()
    }
}

fn connect(fixture: &TestAuthority, principal: Principal) -> Client {
    let id = fixture.authority.register_session(principal, None);
    let transport: Arc<dyn CacheTransport> =
        Arc::new(LoopbackTransport::new(Arc::clone(&fixture.authority), id));
    let session = Arc::new(
        SessionEndpoint::new(
            SessionConfig::new(id.to_string()),
            transport,
            [users_descriptor()],
        )
        .unwrap(),
    );
    let sink: Arc<dyn PushSink> = session.clone();
    assert!(fixture.authority.attach_push_sink(id, &sink));
    Client { session, id }
}

fn admin() -> Principal {
    Principal::new("admin").with_role("admin")
}

fn roles() -> RoleTable {
    RoleTable::new()
        .grant("admin", RoleTable::ANY_CACHE, Operation::ALL)
        .grant("reader", USERS, [Operation::Read])
        .grant("editor", USERS, [Operation::Read, Operation::Update])
}

fn guarded() -> TestAuthority {
    TestAuthority::with_access(AuthorityConfig::default(), Arc::new(roles()))
}

#[tokio::test]
async fn create_update_delete_through_session() {
    let fixture = TestAuthority::allow_all();
    let client = connect(&fixture, admin());
    let users = client.users();

    let created = users.create_object(record(json!({"name": "A"}))).await.unwrap();
    let id = created.get("id").unwrap();
    {
        let set = users.memory_set().lock();
        assert_eq!(set.len(), 1);
        assert!(set.index_lookup("name", &[Value::from("A")]).unwrap()[0].same_object(&created));
    }

    let updated = users
        .update_object(Record::new().with("id", id.clone()).with("name", "B"))
        .await
        .unwrap();
    assert!(updated.same_object(&created));
    {
        let set = users.memory_set().lock();
        assert!(set.index_lookup("name", &[Value::from("A")]).unwrap().is_empty());
        assert!(set.index_lookup("name", &[Value::from("B")]).unwrap()[0].same_object(&created));
    }

    assert_eq!(users.delete_object(IdOrRecord::Id(id.clone())).await.unwrap(), 1);
    {
        let set = users.memory_set().lock();
        assert!(set.is_empty());
        assert!(set.index_lookup("name", &[Value::from("B")]).unwrap().is_empty());
    }
    assert_eq!(fixture.store.row_count(USERS), 0);
}

#[tokio::test]
async fn rejected_update_restores_snapshot() {
    let fixture = guarded();
    fixture
        .seed(USERS, [record(json!({"id": 2, "name": "N", "score": 1}))])
        .await;
    let client = connect(&fixture, Principal::new("ro").with_role("reader"));
    let users = client.users();

    let read = users
        .read_object(QueryInput::Id(Value::Integer(2)), false)
        .await
        .unwrap()
        .unwrap();
    let snapshot = read.snapshot();

    let err = users
        .update_object(record(json!({"id": 2, "score": 5})))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::AccessDenied { .. }));

    let after = users.get_object_now(&Value::Integer(2)).unwrap();
    assert!(after.same_object(&read));
    assert_eq!(after.snapshot(), snapshot);
    assert_eq!(
        fixture.store.row(USERS, &Value::Integer(2)).unwrap().get("score"),
        Some(&Value::Integer(1))
    );
}

#[tokio::test]
async fn rejected_delete_reinserts_in_place() {
    let fixture = guarded();
    fixture
        .seed(
            USERS,
            [
                record(json!({"name": "A", "team": "red"})),
                record(json!({"name": "B", "team": "red"})),
                record(json!({"name": "C", "team": "red"})),
            ],
        )
        .await;
    let client = connect(&fixture, Principal::new("ed").with_role("editor"));
    let users = client.users();
    users.read_objects(QueryInput::filter([("team", "red")])).await.unwrap();
    let middle = users.get_object_now(&Value::Integer(2)).unwrap();

    let err = users.delete_object(IdOrRecord::from(2)).await.unwrap_err();
    assert!(matches!(err, CacheError::AccessDenied { .. }));
    let set = users.memory_set().lock();
    assert_eq!(set.len(), 3);
    assert!(set.list()[1].same_object(&middle));
    assert_eq!(fixture.store.row_count(USERS), 3);
}

#[tokio::test]
async fn rejected_reads_resolve_empty_and_fire_error() {
    let fixture = guarded();
    fixture.seed(USERS, [record(json!({"name": "A"}))]).await;
    let client = connect(&fixture, Principal::new("nobody"));
    let users = client.users();
    let listener = Arc::new(RecordingListener::new());
    users.events().subscribe(listener.clone());

    assert!(users.read_objects(QueryInput::filter([("name", "A")])).await.unwrap().is_empty());
    assert!(users
        .read_object(QueryInput::Id(Value::Integer(1)), false)
        .await
        .unwrap()
        .is_none());
    assert_eq!(listener.count(EventKind::SendingReadQueryToHost), 2);
    assert_eq!(listener.count(EventKind::Error), 2);
    assert!(users.memory_set().lock().is_empty());
}

#[tokio::test]
async fn equal_shapes_share_one_memo_bucket() {
    let fixture = TestAuthority::allow_all();
    fixture
        .seed(
            USERS,
            [
                record(json!({"name": "A", "team": "red"})),
                record(json!({"name": "B", "team": "red"})),
            ],
        )
        .await;
    let client = connect(&fixture, admin());
    let users = client.users();

    let first = QueryInput::filter([("team", "red"), ("name", "A")]);
    let second = QueryInput::Filter(Record::new().with("name", "A").with("team", "red"));
    users.read_objects(first).await.unwrap();
    assert!(fixture.store.last_query(USERS).unwrap().updated_after.is_none());

    users.read_objects(second).await.unwrap();
    assert!(fixture.store.last_query(USERS).unwrap().updated_after.is_some());
    assert_eq!(fixture.store.find_all_calls(USERS), 2);
}

#[tokio::test]
async fn polling_fetches_only_changes_but_answers_fully() {
    let fixture = TestAuthority::allow_all();
    fixture
        .seed(
            USERS,
            [
                record(json!({"name": "A", "team": "red"})),
                record(json!({"name": "B", "team": "red"})),
            ],
        )
        .await;
    let reader = connect(&fixture, admin());
    let writer = connect(&fixture, admin());
    let red = || QueryInput::filter([("team", "red")]);

    assert_eq!(reader.users().read_objects(red()).await.unwrap().len(), 2);
    writer
        .users()
        .update_object(record(json!({"id": 1, "name": "A2"})))
        .await
        .unwrap();

    let again = reader.users().read_objects(red()).await.unwrap();
    assert_eq!(again.len(), 2);
    assert!(fixture.store.last_query(USERS).unwrap().updated_after.is_some());
    assert_eq!(
        reader.users().get_object_now(&Value::Integer(1)).unwrap().get("name"),
        Some(Value::from("A2"))
    );
}

#[tokio::test]
async fn oldest_shape_is_evicted_after_capacity() {
    let fixture = TestAuthority::allow_all();
    let rows: Vec<Record> = (0..101)
        .map(|i| record(json!({"name": format!("u{i}"), "team": format!("t{i}")})))
        .collect();
    fixture.seed(USERS, rows).await;
    let client = connect(&fixture, admin());
    let users = client.users();
    let team = |i: usize| QueryInput::filter([("team", format!("t{i}"))]);

    for i in 0..101 {
        users.read_objects(team(i)).await.unwrap();
    }
    let shared = fixture.authority.registry().get(USERS).unwrap();
    assert_eq!(shared.lock().memo().len(), 100);

    users.read_objects(team(100)).await.unwrap();
    assert!(fixture.store.last_query(USERS).unwrap().updated_after.is_some());

    users.read_objects(team(0)).await.unwrap();
    assert!(fixture.store.last_query(USERS).unwrap().updated_after.is_none());
}

#[tokio::test]
async fn mutations_push_only_to_their_session() {
    let fixture = TestAuthority::allow_all();
    let alice = connect(&fixture, admin());
    let bob = connect(&fixture, admin());
    let listener = Arc::new(RecordingListener::new());
    alice.users().events().subscribe_to(EventKind::Updated, listener.clone());

    alice.users().create_object(record(json!({"name": "A"}))).await.unwrap();
    assert_eq!(alice.users().memory_set().lock().len(), 1);
    assert!(bob.users().memory_set().lock().is_empty());
    // One merge from the push, one from the answer.
    assert_eq!(listener.count(EventKind::Updated), 2);
}

#[tokio::test]
async fn authority_pushes_removals() {
    let fixture = TestAuthority::allow_all();
    let client = connect(&fixture, admin());
    let users = client.users();
    let created = users.create_object(record(json!({"name": "A"}))).await.unwrap();
    let id = created.get("id").unwrap();

    let endpoint = fixture
        .authority
        .endpoint(USERS, RequestContext::new(admin()).with_session(client.id))
        .unwrap();
    assert_eq!(endpoint.delete_object(IdOrRecord::Id(id.clone())).await.unwrap(), 1);
    assert!(users.get_object_now(&id).is_none());
    assert!(fixture.authority.cache(USERS).unwrap().cache().get_object_now(&id).is_none());
}

#[tokio::test]
async fn ended_sessions_are_refused() {
    let fixture = TestAuthority::allow_all();
    let client = connect(&fixture, admin());
    assert!(fixture.authority.end_session(client.id));

    let err = client
        .users()
        .create_object(record(json!({"name": "A"})))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::AccessDenied { .. }));
    assert_eq!(fixture.store.row_count(USERS), 0);
}

#[tokio::test]
async fn store_failures_reach_the_writer_with_cache_name() {
    let fixture = TestAuthority::allow_all();
    let client = connect(&fixture, admin());
    fixture.store.fail_next("disk full");

    let err = client
        .users()
        .create_object(record(json!({"name": "A"})))
        .await
        .unwrap_err();
    match err {
        CacheError::Store { cache, message } => {
            assert_eq!(cache, USERS);
            assert!(message.contains("disk full"));
        }
        other => panic!("expected store error, got {other}"),
    }
    assert!(client.users().memory_set().lock().is_empty());
}
