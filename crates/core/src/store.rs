//! Deployment store: CRUD and listing, source of truth for desired state.
//!
//! Durability is pluggable per §4.5 — this module defines the
//! [`DeploymentStore`] trait the reconciler and HTTP boundary depend on,
//! plus [`InMemoryStore`], a crash-*inconsistent* reference implementation
//! used by tests and as `symphony-http`'s default backing until a durable
//! repository is wired in by the embedding application.
//!
//! Every method takes `now_ms` explicitly rather than reading the system
//! clock itself, so the reconciler's tests can drive the store
//! deterministically and so a single tick's clock reading is shared across
//! every store call it makes.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{CapacityVector, CurrentState, Deployment, DeploymentKind, DesiredState};

/// Fields a caller may ask [`DeploymentStore::create`] to populate. The
/// store assigns `id`, timestamps and the initial `spec_revision`.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    /// User-chosen name, must be unique among non-deleted records.
    pub name: String,
    /// Execution backend.
    pub kind: DeploymentKind,
    /// Placement group.
    pub node_group: String,
    /// Per-label capacity request.
    pub capacity_requests: CapacityVector,
    /// Opaque specification blob.
    pub specification: Value,
    /// Initial desired state (almost always `Running`).
    pub desired_state: DesiredState,
}

/// Outcome of [`DeploymentStore::create`].
#[derive(Debug)]
pub enum CreateOutcome {
    /// Created; the full record including server-assigned fields.
    Created(Deployment),
    /// `name` collides with a live (non-deleted) record, per I5.
    NameConflict,
}

/// Fields [`DeploymentStore::update`] may change. `None` leaves a field
/// untouched; `spec_revision` bumps only if a `Some` field actually differs
/// from the stored value, per I4 ("strictly increases on every accepted
/// PATCH that changes the specification or desired state").
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    /// New desired lifecycle target, if changing.
    pub desired_state: Option<DesiredState>,
    /// New name, if changing (subject to the same uniqueness rule as `create`).
    pub name: Option<String>,
    /// New opaque specification, if changing.
    pub specification: Option<Value>,
}

/// Outcome of [`DeploymentStore::update`].
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Accepted; carries the new `spec_revision` (unchanged if the patch
    /// was a no-op relative to the stored record).
    Updated(u64),
    /// The patch's `name` collides with a different live record.
    NameConflict,
    /// No record with this id (or it is tombstoned).
    NotFound,
}

/// A CRUD + listing repository for deployment records.
///
/// `create`/`list`/`get`/`update`/`delete` map directly onto §4.5. The
/// trait is `async_trait` so it can be stored as `Arc<dyn DeploymentStore>`
/// behind both the in-memory implementation here and a durable backend
/// supplied by the embedding application (out of scope per spec.md §1).
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Create a new deployment record.
    async fn create(&self, new: NewDeployment, now_ms: i64) -> CreateOutcome;

    /// Fetch a single (non-deleted) record by id.
    async fn get(&self, id: &str) -> Option<Deployment>;

    /// List records in stable order by `(created_at_ms, id)`, skipping the
    /// first `offset` and returning at most `limit`. Deleted (tombstoned)
    /// records are excluded.
    async fn list(&self, limit: usize, offset: usize) -> Vec<Deployment>;

    /// Apply a partial update.
    async fn update(&self, id: &str, patch: DeploymentPatch, now_ms: i64) -> UpdateOutcome;

    /// Record the node supervisor's reported `current_state`/`exit_code`
    /// for a deployment, without touching `spec_revision`. Used by the
    /// reconciler when applying a `DeploymentStatusList` entry.
    async fn report_state(
        &self,
        id: &str,
        current_state: CurrentState,
        exit_code: Option<i32>,
        now_ms: i64,
    );

    /// Record (or clear) the live assignment for a deployment. Used by the
    /// reconciler after a scheduler placement, a node loss, or a deletion.
    async fn set_assignment(
        &self,
        id: &str,
        assigned_node_id: Option<String>,
        assignment_reason: Option<String>,
        now_ms: i64,
    );

    /// Tombstone a record: `deleted` becomes `true`, `name` stays reserved
    /// until [`DeploymentStore::purge`] removes it entirely. Idempotent.
    async fn delete(&self, id: &str, now_ms: i64);

    /// Remove a tombstoned record entirely, freeing its `name` for reuse.
    /// Called by the reconciler once it has confirmed node-side teardown
    /// (or immediately, if the record was never assigned).
    async fn purge(&self, id: &str);

    /// All non-deleted records with `desired_state == Running` and no live
    /// assignment — the reconciler's unassigned-deployment sweep set.
    async fn unassigned_running(&self) -> Vec<Deployment>;

    /// All non-deleted records currently assigned to `node_id`. Used to
    /// release capacity and clear assignments on node loss (I3).
    async fn assigned_to(&self, node_id: &str) -> Vec<Deployment>;

    /// All tombstoned records still pending a `purge`.
    async fn pending_deletion(&self) -> Vec<Deployment>;
}

struct Entry {
    record: Deployment,
    /// Insertion sequence, used as the list's stable secondary sort key so
    /// equal `created_at_ms` values (a real risk at millisecond resolution
    /// under concurrent `POST /deployments`) still order deterministically.
    sequence: u64,
}

/// In-memory [`DeploymentStore`]. Crash-inconsistent by design — a durable
/// `Arc<dyn DeploymentStore>` implementation is the embedding application's
/// responsibility per spec.md §1/§6.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    records: BTreeMap<String, Entry>,
    next_sequence: u64,
}

impl InMemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn name_taken(records: &BTreeMap<String, Entry>, name: &str, excluding: Option<&str>) -> bool {
        records.values().any(|e| {
            !e.record.deleted
                && e.record.name == name
                && excluding.map(|id| id != e.record.id).unwrap_or(true)
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeploymentStore for InMemoryStore {
    async fn create(&self, new: NewDeployment, now_ms: i64) -> CreateOutcome {
        let mut inner = self.inner.write().await;
        if Self::name_taken(&inner.records, &new.name, None) {
            return CreateOutcome::NameConflict;
        }

        let id = Uuid::new_v4().to_string();
        let record = Deployment {
            id: id.clone(),
            name: new.name,
            kind: new.kind,
            node_group: new.node_group,
            capacity_requests: new.capacity_requests,
            specification: new.specification,
            desired_state: new.desired_state,
            current_state: CurrentState::Pending,
            assigned_node_id: None,
            assignment_reason: None,
            exit_code: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            spec_revision: 1,
            deleted: false,
        };

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.records.insert(
            id,
            Entry {
                record: record.clone(),
                sequence,
            },
        );
        CreateOutcome::Created(record)
    }

    async fn get(&self, id: &str) -> Option<Deployment> {
        self.inner
            .read()
            .await
            .records
            .get(id)
            .filter(|e| !e.record.deleted)
            .map(|e| e.record.clone())
    }

    async fn list(&self, limit: usize, offset: usize) -> Vec<Deployment> {
        let inner = self.inner.read().await;
        let mut live: Vec<&Entry> = inner.records.values().filter(|e| !e.record.deleted).collect();
        live.sort_by_key(|e| (e.record.created_at_ms, e.sequence));
        live.into_iter()
            .skip(offset)
            .take(limit)
            .map(|e| e.record.clone())
            .collect()
    }

    async fn update(&self, id: &str, patch: DeploymentPatch, now_ms: i64) -> UpdateOutcome {
        let mut inner = self.inner.write().await;
        if let Some(name) = &patch.name {
            if Self::name_taken(&inner.records, name, Some(id)) {
                return UpdateOutcome::NameConflict;
            }
        }

        let Some(entry) = inner.records.get_mut(id).filter(|e| !e.record.deleted) else {
            return UpdateOutcome::NotFound;
        };

        let mut changed = false;
        if let Some(desired_state) = patch.desired_state {
            if entry.record.desired_state != desired_state {
                entry.record.desired_state = desired_state;
                changed = true;
            }
        }
        if let Some(name) = patch.name {
            if entry.record.name != name {
                entry.record.name = name;
                changed = true;
            }
        }
        if let Some(specification) = patch.specification {
            if entry.record.specification != specification {
                entry.record.specification = specification;
                changed = true;
            }
        }

        if changed {
            entry.record.spec_revision += 1;
            entry.record.updated_at_ms = now_ms;
        }
        UpdateOutcome::Updated(entry.record.spec_revision)
    }

    async fn report_state(
        &self,
        id: &str,
        current_state: CurrentState,
        exit_code: Option<i32>,
        now_ms: i64,
    ) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.records.get_mut(id) {
            entry.record.current_state = current_state;
            if exit_code.is_some() {
                entry.record.exit_code = exit_code;
            }
            entry.record.updated_at_ms = now_ms;
        }
    }

    async fn set_assignment(
        &self,
        id: &str,
        assigned_node_id: Option<String>,
        assignment_reason: Option<String>,
        now_ms: i64,
    ) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.records.get_mut(id) {
            entry.record.assigned_node_id = assigned_node_id;
            entry.record.assignment_reason = assignment_reason;
            entry.record.updated_at_ms = now_ms;
        }
    }

    async fn delete(&self, id: &str, now_ms: i64) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.records.get_mut(id) {
            entry.record.deleted = true;
            entry.record.updated_at_ms = now_ms;
        }
    }

    async fn purge(&self, id: &str) {
        self.inner.write().await.records.remove(id);
    }

    async fn unassigned_running(&self) -> Vec<Deployment> {
        self.inner
            .read()
            .await
            .records
            .values()
            .map(|e| &e.record)
            .filter(|r| !r.deleted && r.desired_state == DesiredState::Running && r.assigned_node_id.is_none())
            .cloned()
            .collect()
    }

    async fn assigned_to(&self, node_id: &str) -> Vec<Deployment> {
        self.inner
            .read()
            .await
            .records
            .values()
            .map(|e| &e.record)
            .filter(|r| !r.deleted && r.assigned_node_id.as_deref() == Some(node_id))
            .cloned()
            .collect()
    }

    async fn pending_deletion(&self) -> Vec<Deployment> {
        self.inner
            .read()
            .await
            .records
            .values()
            .map(|e| &e.record)
            .filter(|r| r.deleted)
            .cloned()
            .collect()
    }
}

/// Shared handle to a [`DeploymentStore`] implementation.
pub type SharedStore = Arc<dyn DeploymentStore>;

#[cfg(test)]
mod tests {
    use super::*;

    fn new_deployment(name: &str) -> NewDeployment {
        NewDeployment {
            name: name.to_string(),
            kind: DeploymentKind::Exec,
            node_group: "default".to_string(),
            capacity_requests: CapacityVector::from_pairs([("cpu", 1)]),
            specification: Value::Null,
            desired_state: DesiredState::Running,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_name() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.create(new_deployment("web"), 0).await,
            CreateOutcome::Created(_)
        ));
        assert!(matches!(
            store.create(new_deployment("web"), 0).await,
            CreateOutcome::NameConflict
        ));
    }

    #[tokio::test]
    async fn delete_then_create_same_name_is_rejected_until_purge() {
        let store = InMemoryStore::new();
        let CreateOutcome::Created(d) = store.create(new_deployment("web"), 0).await else {
            panic!()
        };
        store.delete(&d.id, 1).await;
        assert!(matches!(
            store.create(new_deployment("web"), 2).await,
            CreateOutcome::NameConflict
        ));
        store.purge(&d.id).await;
        assert!(matches!(
            store.create(new_deployment("web"), 3).await,
            CreateOutcome::Created(_)
        ));
    }

    #[tokio::test]
    async fn update_bumps_revision_only_on_change() {
        let store = InMemoryStore::new();
        let CreateOutcome::Created(d) = store.create(new_deployment("web"), 0).await else {
            panic!()
        };
        assert_eq!(d.spec_revision, 1);

        // No-op patch: revision must not bump.
        let outcome = store.update(&d.id, DeploymentPatch::default(), 10).await;
        assert!(matches!(outcome, UpdateOutcome::Updated(1)));

        let outcome = store
            .update(
                &d.id,
                DeploymentPatch {
                    desired_state: Some(DesiredState::Stopped),
                    ..Default::default()
                },
                11,
            )
            .await;
        assert!(matches!(outcome, UpdateOutcome::Updated(2)));
    }

    #[tokio::test]
    async fn list_is_stable_by_creation_order() {
        let store = InMemoryStore::new();
        store.create(new_deployment("a"), 100).await;
        store.create(new_deployment("b"), 100).await; // same timestamp
        store.create(new_deployment("c"), 50).await;

        let names: Vec<_> = store.list(10, 0).await.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn unassigned_running_excludes_stopped_and_assigned() {
        let store = InMemoryStore::new();
        let CreateOutcome::Created(a) = store.create(new_deployment("a"), 0).await else { panic!() };
        let CreateOutcome::Created(_b) = store.create(new_deployment("b"), 0).await else { panic!() };
        store
            .update(
                &a.id,
                DeploymentPatch {
                    desired_state: Some(DesiredState::Running),
                    ..Default::default()
                },
                0,
            )
            .await;
        store.set_assignment(&a.id, Some("n1".to_string()), None, 0).await;

        let unassigned = store.unassigned_running().await;
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].name, "b");
    }
}
