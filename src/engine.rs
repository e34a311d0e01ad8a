//! Resolution engine facade.
//!
//! [`ResolutionEngine`] ties one project's graph store and audit log to a
//! default configuration and exposes the three request-level operations:
//! finding duplicate candidates, executing a merge and reading merge history.

use std::sync::Arc;

use crate::audit::{ActorKind, AuditLog, MergeHistory};
use crate::config::{validate_threshold, ResolutionConfig};
use crate::error::{MergeError, ResolveResult, ValidationError};
use crate::graph::NodeId;
use crate::resolution::{
    CancellationToken, MergeExecutor, MergeOutcome, ResolutionCandidate, ScanReport, Scanner,
};
use crate::storage::GraphStore;

/// Entity resolution over one project's graph.
///
/// Cheap to clone; clones share the store and the audit log.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use kyroql_resolve::{EntityType, Node, ResolutionConfig, ResolutionEngine};
/// use kyroql_resolve::audit::InMemoryAuditLog;
/// use kyroql_resolve::storage::InMemoryGraphStore;
///
/// let store = Arc::new(InMemoryGraphStore::new());
/// store.insert_node(Node::new("1", "Sidney Gottlieb", EntityType::Person))?;
/// store.insert_node(Node::new("2", "Sidney  Gottlieb.", EntityType::Person))?;
///
/// let engine = ResolutionEngine::new(store, Arc::new(InMemoryAuditLog::new()), ResolutionConfig::default())?;
/// let candidates = engine.find_candidates(0.7)?;
/// assert_eq!(candidates.len(), 1);
///
/// let outcome = engine.execute_merge("2", "1", "reviewer")?;
/// assert_eq!(outcome.resulting_id.as_str(), "1");
/// assert_eq!(engine.get_merge_history("2")?.len(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct ResolutionEngine {
    store: Arc<dyn GraphStore>,
    audit: Arc<dyn AuditLog>,
    config: ResolutionConfig,
}

impl std::fmt::Debug for ResolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ResolutionEngine {
    /// Creates an engine, validating `config`.
    pub fn new(
        store: Arc<dyn GraphStore>,
        audit: Arc<dyn AuditLog>,
        config: ResolutionConfig,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self { store, audit, config })
    }

    /// The default configuration used by the convenience entry points.
    #[must_use]
    pub const fn config(&self) -> &ResolutionConfig {
        &self.config
    }

    /// The graph store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// The audit log.
    #[must_use]
    pub fn audit(&self) -> &Arc<dyn AuditLog> {
        &self.audit
    }

    /// Ranked duplicate candidates scoring at least `threshold`.
    ///
    /// Uses the engine's configuration for everything except the threshold.
    pub fn find_candidates(&self, threshold: f64) -> ResolveResult<Vec<ResolutionCandidate>> {
        validate_threshold(threshold)?;
        let config = self.config.clone().with_threshold(threshold);
        self.find_candidates_with(&config, &CancellationToken::new())
    }

    /// Ranked duplicate candidates under an explicit configuration.
    pub fn find_candidates_with(
        &self,
        config: &ResolutionConfig,
        cancel: &CancellationToken,
    ) -> ResolveResult<Vec<ResolutionCandidate>> {
        Ok(self.scan(config, cancel)?.candidates)
    }

    /// Full scan report: candidates plus unblockable and skipped nodes.
    pub fn scan(&self, config: &ResolutionConfig, cancel: &CancellationToken) -> ResolveResult<ScanReport> {
        config.validate()?;
        let snapshot = self.store.snapshot()?;
        Scanner::new(config).scan(&snapshot, cancel)
    }

    /// Merges `source` into `target` as a human actor.
    pub fn execute_merge(
        &self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        actor: impl Into<String>,
    ) -> Result<MergeOutcome, MergeError> {
        self.execute_merge_as(source, target, actor, ActorKind::Human)
    }

    /// Merges `source` into `target`, recording the kind of actor.
    pub fn execute_merge_as(
        &self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        actor: impl Into<String>,
        actor_kind: ActorKind,
    ) -> Result<MergeOutcome, MergeError> {
        self.execute_merge_with(&self.config, source, target, actor, actor_kind)
    }

    /// Merges under an explicit configuration.
    pub fn execute_merge_with(
        &self,
        config: &ResolutionConfig,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        actor: impl Into<String>,
        actor_kind: ActorKind,
    ) -> Result<MergeOutcome, MergeError> {
        config.validate()?;
        let (source, target, actor) = (source.into(), target.into(), actor.into());
        MergeExecutor::new(self.store.as_ref(), self.audit.as_ref(), config)
            .merge(&source, &target, &actor, actor_kind)
    }

    /// Merge records for `id` and its lineage, most recent first.
    ///
    /// Works for ids that were merged away.
    pub fn get_merge_history(&self, id: impl Into<NodeId>) -> ResolveResult<Vec<MergeHistory>> {
        let id = id.into();
        if id.is_blank() {
            return Err(ValidationError::EmptyNodeId.into());
        }
        Ok(self.audit.history_for(&id)?)
    }

    /// The live node an id denotes now, following merge redirects.
    pub fn resolve_id(&self, id: impl Into<NodeId>) -> ResolveResult<Option<NodeId>> {
        Ok(self.store.resolve_id(&id.into())?)
    }
}
