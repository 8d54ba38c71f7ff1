//! Entry point for the Host Portal

use std::future::Future;
use std::sync::Arc;

use ahash::AHashMap;
use dx_core::events::events::{
    RequestSuperseded, SchemaInferred, SessionClosed, SessionOpened, WindowFetched,
};
use dx_core::{EventBus, ResolvedResource, ResourceResolver, Schema, TabularStore};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AdapterConfig;
use crate::sampling::{SamplePlan, SamplingStrategy};
use crate::schema::SchemaInferencer;
use crate::session::{ExplorationSession, RequestTicket, SchemaMemo};
use crate::view_state::{Cursor, ExplorerPayload, UiRequest, ViewStateAdapter, WireColumn};
use crate::windower::{RowWindower, WindowRequest};
use crate::AdapterError;

/// Opens exploration sessions and serves their pages
pub struct AdapterFacade {
    config: AdapterConfig,
    resolver: Arc<dyn ResourceResolver>,
    sessions: RwLock<AHashMap<Uuid, Arc<ExplorationSession>>>,
    events: Arc<EventBus>,
    inferencer: SchemaInferencer,
    sampling: SamplingStrategy,
    windower: RowWindower,
    view_state: ViewStateAdapter,
}

impl AdapterFacade {
    /// Create a facade resolving resources through `resolver`
    pub fn new(resolver: Arc<dyn ResourceResolver>, config: AdapterConfig) -> Result<Self, AdapterError> {
        config.validate()?;
        let events = Arc::new(EventBus::new());

        Ok(Self {
            inferencer: SchemaInferencer::from_config(&config),
            sampling: SamplingStrategy::from_config(&config),
            windower: RowWindower::from_config(&config).with_events(events.clone()),
            view_state: ViewStateAdapter::from_config(&config),
            config,
            resolver,
            sessions: RwLock::new(AHashMap::new()),
            events,
        })
    }

    /// Publish adapter events on a bus owned by the host
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.windower = RowWindower::from_config(&self.config).with_events(events.clone());
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Open a session on a resource and return its first window
    pub async fn open(&self, resource_id: &str) -> Result<ExplorerPayload, AdapterError> {
        let resource = self.resolve(resource_id).await?;

        let session = Arc::new(ExplorationSession::new(resource_id));
        self.sessions.write().insert(session.id(), session.clone());
        info!("Opened session {} on resource '{}'", session.id(), resource_id);
        self.events.publish(SessionOpened {
            session_id: session.id().to_string(),
            resource_id: resource_id.to_string(),
        });

        let ticket = session.begin_request();
        let request = self.view_state.initial_request();
        let result = self
            .run(&session, ticket, async {
                let memo = self.ensure_schema(&session, &resource).await?;
                self.window_payload(&session, &memo, resource.store.as_ref(), &request)
                    .await
            })
            .await;

        if result.is_err() {
            self.close_session(session.id());
        }
        result
    }

    /// Serve a follow-up interaction on the session named by `cursor`
    pub async fn page(&self, cursor: &str, request: &UiRequest) -> Result<ExplorerPayload, AdapterError> {
        let cursor = Cursor::decode(cursor)?;
        let session = self
            .session(cursor.session)
            .ok_or_else(|| AdapterError::InvalidCursor(format!("unknown session {}", cursor.session)))?;
        if cursor.epoch > session.current_epoch() {
            return Err(AdapterError::InvalidCursor(format!(
                "epoch {} was never issued by session {}",
                cursor.epoch,
                session.id()
            )));
        }

        let ticket = session.begin_request();
        debug!(
            "Page request generation {} on session {}",
            ticket.generation(),
            session.id()
        );
        self.run(&session, ticket, async {
            let resource = self.resolve(session.resource_id()).await?;
            let memo = self.ensure_schema(&session, &resource).await?;
            let query = self.view_state.from_interaction(&memo.schema, &cursor, request)?;
            self.window_payload(&session, &memo, resource.store.as_ref(), &query)
                .await
        })
        .await
    }

    /// Inferred columns of a resource, without opening a session
    pub async fn describe(&self, resource_id: &str, sorted: bool) -> Result<Vec<WireColumn>, AdapterError> {
        let resource = self.resolve(resource_id).await?;
        let (schema, _, _) = self.infer_schema(resource_id, resource.store.as_ref()).await?;

        let mut columns: Vec<WireColumn> = schema.columns().iter().map(WireColumn::from).collect();
        if sorted {
            columns.sort_by(|a, b| {
                let a = a.title.as_deref().unwrap_or(&a.name);
                let b = b.title.as_deref().unwrap_or(&b.name);
                a.cmp(b)
            });
        }
        Ok(columns)
    }

    /// Discard the session named by `cursor`
    pub fn close(&self, cursor: &str) -> Result<bool, AdapterError> {
        let cursor = Cursor::decode(cursor)?;
        Ok(self.close_session(cursor.session))
    }

    pub fn close_session(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            info!("Closed session {}", id);
            self.events.publish(SessionClosed {
                session_id: id.to_string(),
            });
        }
        removed
    }

    pub fn session(&self, id: Uuid) -> Option<Arc<ExplorationSession>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Race a request against newer requests on the same session
    async fn run<F>(
        &self,
        session: &ExplorationSession,
        mut ticket: RequestTicket,
        work: F,
    ) -> Result<ExplorerPayload, AdapterError>
    where
        F: Future<Output = Result<ExplorerPayload, AdapterError>>,
    {
        let outcome = tokio::select! {
            biased;
            generation = ticket.superseded() => Err(AdapterError::Superseded { generation }),
            result = work => result,
        };

        let outcome = match outcome {
            Ok(payload) => session.apply(&ticket, payload),
            Err(error) => Err(error),
        };

        if let Err(AdapterError::Superseded { generation }) = &outcome {
            debug!(
                "Request {} on session {} superseded by {}",
                ticket.generation(),
                session.id(),
                generation
            );
            self.events.publish(RequestSuperseded {
                session_id: session.id().to_string(),
                generation: ticket.generation(),
            });
        }
        outcome
    }

    async fn resolve(&self, resource_id: &str) -> Result<ResolvedResource, AdapterError> {
        let resource = self.resolver.resolve(resource_id).await?;
        if !resource.descriptor.is_explorable() {
            return Err(AdapterError::NotExplorable(resource_id.to_string()));
        }
        Ok(resource)
    }

    /// Memoized schema of the session, re-inferred when the store version changed
    async fn ensure_schema(
        &self,
        session: &ExplorationSession,
        resource: &ResolvedResource,
    ) -> Result<SchemaMemo, AdapterError> {
        let store = resource.store.as_ref();
        let version = self.windower.version(store).await?;

        if let Some(memo) = session.schema_memo() {
            if memo.version == version {
                return Ok(memo);
            }
            info!(
                "Resource '{}' changed ({:?} -> {:?}); re-inferring schema",
                session.resource_id(),
                memo.version,
                version
            );
        }

        let (schema, plan, sample_rows) = self.infer_schema(session.resource_id(), store).await?;
        let memo = session.store_memo(schema, plan, version, sample_rows);

        info!(
            "Inferred {} columns for session {} from {} sampled rows",
            memo.schema.len(),
            session.id(),
            sample_rows
        );
        self.events.publish(SchemaInferred {
            session_id: session.id().to_string(),
            column_count: memo.schema.len(),
            sample_rows,
            epoch: memo.epoch,
        });
        Ok(memo)
    }

    async fn infer_schema(
        &self,
        resource_id: &str,
        store: &dyn TabularStore,
    ) -> Result<(Schema, SamplePlan, usize), AdapterError> {
        let estimate = self.windower.count(store).await?;
        let plan = self.sampling.plan(estimate);
        let sample = self.sampling.collect(&self.windower, store, plan).await?;
        let hints = self.windower.column_metadata(store).await?;

        let schema = self.inferencer.infer_checked(resource_id, &sample, &hints)?;
        Ok((schema, plan, sample.len()))
    }

    async fn window_payload(
        &self,
        session: &ExplorationSession,
        memo: &SchemaMemo,
        store: &dyn TabularStore,
        request: &WindowRequest,
    ) -> Result<ExplorerPayload, AdapterError> {
        let window = self.windower.fetch(store, request).await?;
        let cursor = Cursor::for_window(session.id(), memo.epoch, request, &window);

        self.events.publish(WindowFetched {
            session_id: session.id().to_string(),
            offset: window.offset,
            rows: window.len(),
        });
        self.view_state.to_wire_payload(&memo.schema, &window, &cursor)
    }
}
