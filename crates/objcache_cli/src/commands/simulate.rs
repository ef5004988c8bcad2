//! Simulate command implementation.
//!
//! Runs an authority over an in-memory store, connects several sessions
//! through the loopback transport and lets them poll one query shape per
//! team while one session keeps updating rows. The report shows how many
//! store reads were full fetches and how many were narrowed by the memo.

use super::{CommandError, Format};
use async_trait::async_trait;
use objcache_authority::{
    AllowAll, Authority, AuthorityConfig, BackingStore, LoopbackTransport, MemoryStore, Principal,
    StoreResult,
};
use objcache_core::{
    CacheConfig, CacheDescriptor, CacheEndpoint, CacheError, IndexDefinition, QueryDescriptor,
    QueryInput, Record, Selector,
};
use objcache_protocol::{CacheTransport, PushSink};
use objcache_session::{SessionConfig, SessionEndpoint};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

const CACHE: &str = "users";

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Number of polling sessions.
    pub sessions: usize,
    /// Number of polling rounds.
    pub rounds: usize,
    /// Number of seeded rows.
    pub rows: usize,
    /// Number of distinct teams.
    pub teams: usize,
    /// Rows updated between rounds.
    pub writes: usize,
    /// Authority memo capacity.
    pub memo_capacity: usize,
}

/// What the simulation observed.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Number of sessions.
    pub sessions: usize,
    /// Number of rounds.
    pub rounds: usize,
    /// `read_objects` calls made by sessions.
    pub reads: u64,
    /// Store reads without an `updated_after` bound.
    pub full_fetches: u64,
    /// Store reads narrowed by the memo.
    pub incremental_fetches: u64,
    /// Rows returned by the store.
    pub rows_fetched: u64,
    /// Objects returned to sessions.
    pub rows_answered: u64,
    /// Query shapes remembered by the authority.
    pub memo_shapes: usize,
    /// Objects in the authority's shared MemorySet.
    pub authority_objects: usize,
    /// Objects in each session's MemorySet.
    pub session_objects: Vec<usize>,
}

/// A [`MemoryStore`] that counts `find_all` traffic.
#[derive(Debug, Default)]
struct CountingStore {
    inner: MemoryStore,
    full: AtomicU64,
    incremental: AtomicU64,
    rows: AtomicU64,
}

#[async_trait]
impl BackingStore for CountingStore {
    async fn find_one(&self, cache: &str, query: &QueryDescriptor) -> StoreResult<Option<Record>> {
        self.inner.find_one(cache, query).await
    }

    async fn find_all(&self, cache: &str, query: &QueryDescriptor) -> StoreResult<Vec<Record>> {
        let rows = self.inner.find_all(cache, query).await?;
        let counter = if query.updated_after.is_some() {
            &self.incremental
        } else {
            &self.full
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.rows.fetch_add(rows.len() as u64, Ordering::Relaxed);
        Ok(rows)
    }

    async fn create(&self, cache: &str, values: Record) -> StoreResult<Record> {
        self.inner.create(cache, values).await
    }

    async fn update(&self, cache: &str, values: Record, selector: &Selector) -> StoreResult<u64> {
        self.inner.update(cache, values, selector).await
    }

    async fn destroy(&self, cache: &str, selector: &Selector) -> StoreResult<u64> {
        self.inner.destroy(cache, selector).await
    }
}

fn users() -> CacheDescriptor {
    CacheDescriptor::new(CACHE)
        .with_index(IndexDefinition::new("name", ["name"]).unique())
        .with_index(IndexDefinition::new("team", ["team"]))
        .with_host_memory_set(true)
}

fn team_name(n: usize) -> String {
    format!("team-{n}")
}

/// Runs the simulation and returns its report.
pub async fn simulate(plan: &Plan) -> Result<SimulationReport, CommandError> {
    if plan.sessions == 0 || plan.teams == 0 {
        return Err(CommandError::Input("need at least one session and one team".into()));
    }

    let descriptor = users();
    let store = Arc::new(CountingStore::default());
    store.inner.define_table(&descriptor);
    let config = AuthorityConfig::new()
        .with_cache_config(CacheConfig::new().with_memo_capacity(plan.memo_capacity));
    let authority = Arc::new(Authority::new(config, store.clone(), Arc::new(AllowAll)));
    authority.install(descriptor.clone())?;

    for i in 0..plan.rows {
        let row = Record::new()
            .with("name", format!("user-{i}"))
            .with("team", team_name(i % plan.teams))
            .with("score", 0);
        store
            .inner
            .create(CACHE, row)
            .await
            .map_err(|e| CacheError::store(CACHE, e))?;
    }

    let mut sessions = Vec::with_capacity(plan.sessions);
    for n in 0..plan.sessions {
        let label = format!("sim-{n}");
        let id = authority.register_session(Principal::new(label.clone()), None);
        let transport: Arc<dyn CacheTransport> =
            Arc::new(LoopbackTransport::new(Arc::clone(&authority), id));
        let session = Arc::new(SessionEndpoint::new(
            SessionConfig::new(label),
            transport,
            [descriptor.clone()],
        )?);
        let sink: Arc<dyn PushSink> = session.clone();
        authority.attach_push_sink(id, &sink);
        sessions.push(session);
    }

    let mut reads = 0u64;
    let mut rows_answered = 0u64;
    for round in 0..plan.rounds {
        if round > 0 && plan.rows > 0 {
            let writer = sessions[0].cache(CACHE)?;
            for w in 0..plan.writes {
                let id = ((round * plan.writes + w) % plan.rows) as i64 + 1;
                writer
                    .update_object(Record::new().with("id", id).with("score", round as i64))
                    .await?;
            }
        }
        for session in &sessions {
            let users = session.cache(CACHE)?;
            for team in 0..plan.teams {
                let objects = users
                    .read_objects(QueryInput::filter([("team", team_name(team))]))
                    .await?;
                reads += 1;
                rows_answered += objects.len() as u64;
            }
        }
        info!(
            round,
            full = store.full.load(Ordering::Relaxed),
            incremental = store.incremental.load(Ordering::Relaxed),
            fetched = store.rows.load(Ordering::Relaxed),
            "round complete"
        );
    }

    let shared = authority.registry().get(CACHE);
    let (memo_shapes, authority_objects) = shared.map_or((0, 0), |set| {
        let set = set.lock();
        (set.memo().len(), set.len())
    });
    let session_objects = sessions
        .iter()
        .map(|s| s.registry().get(CACHE).map_or(0, |set| set.lock().len()))
        .collect();

    Ok(SimulationReport {
        sessions: plan.sessions,
        rounds: plan.rounds,
        reads,
        full_fetches: store.full.load(Ordering::Relaxed),
        incremental_fetches: store.incremental.load(Ordering::Relaxed),
        rows_fetched: store.rows.load(Ordering::Relaxed),
        rows_answered,
        memo_shapes,
        authority_objects,
        session_objects,
    })
}

/// Runs the simulate command.
pub fn run(plan: &Plan, format: &str) -> Result<(), CommandError> {
    let format = Format::parse(format)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(simulate(plan))?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => {
            println!("objcache simulation");
            println!("===================");
            println!("Sessions:            {}", report.sessions);
            println!("Rounds:              {}", report.rounds);
            println!("Session reads:       {}", report.reads);
            println!("Full fetches:        {}", report.full_fetches);
            println!("Incremental fetches: {}", report.incremental_fetches);
            println!("Rows fetched:        {}", report.rows_fetched);
            println!("Rows answered:       {}", report.rows_answered);
            println!("Memo shapes:         {}", report.memo_shapes);
            println!("Authority objects:   {}", report.authority_objects);
            println!("Session objects:     {:?}", report.session_objects);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        Plan {
            sessions: 3,
            rounds: 4,
            rows: 40,
            teams: 4,
            writes: 2,
            memo_capacity: 100,
        }
    }

    #[tokio::test]
    async fn only_first_read_per_shape_is_full() {
        let report = simulate(&plan()).await.unwrap();
        assert_eq!(report.reads, 3 * 4 * 4);
        assert_eq!(report.full_fetches, 4);
        assert_eq!(report.incremental_fetches, report.reads - 4);
        assert_eq!(report.rows_answered, 3 * 4 * 40);
        assert_eq!(report.memo_shapes, 4);
        assert_eq!(report.authority_objects, 40);
        assert_eq!(report.session_objects, vec![40, 40, 40]);
        assert!(report.rows_fetched < report.rows_answered);
    }

    #[tokio::test]
    async fn tiny_memo_forces_full_fetches() {
        let report = simulate(&Plan {
            memo_capacity: 1,
            ..plan()
        })
        .await
        .unwrap();
        assert_eq!(report.full_fetches, report.reads);
        assert_eq!(report.memo_shapes, 1);
    }

    #[tokio::test]
    async fn rejects_empty_plans() {
        let err = simulate(&Plan { teams: 0, ..plan() }).await.unwrap_err();
        assert!(matches!(err, CommandError::Input(_)));
    }
}
