//! Per-session exploration state
//!
//! A session memoizes its schema and sample plan, and orders its requests by
//! generation: beginning a request supersedes every older one still in
//! flight, and only the newest request may replace the applied view.

use std::sync::Arc;

use dx_core::Schema;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use uuid::Uuid;

use crate::sampling::SamplePlan;
use crate::view_state::ExplorerPayload;
use crate::AdapterError;

/// Schema and sampling decision memoized for a session
#[derive(Debug, Clone)]
pub struct SchemaMemo {
    pub schema: Arc<Schema>,
    pub plan: SamplePlan,
    /// Store version the schema was inferred from
    pub version: Option<String>,
    /// Increments every time the schema is re-inferred
    pub epoch: u64,
    pub sample_rows: usize,
}

/// The payload most recently applied to a session
#[derive(Debug, Clone)]
pub struct AppliedView {
    pub generation: u64,
    pub payload: ExplorerPayload,
}

/// Permission to apply one request's result
pub struct RequestTicket {
    generation: u64,
    receiver: watch::Receiver<u64>,
}

impl RequestTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether no newer request has started
    pub fn is_current(&self) -> bool {
        *self.receiver.borrow() == self.generation
    }

    /// Resolve once a newer request starts, with that request's generation
    pub async fn superseded(&mut self) -> u64 {
        loop {
            let latest = *self.receiver.borrow_and_update();
            if latest != self.generation {
                return latest;
            }
            if self.receiver.changed().await.is_err() {
                // session dropped
                return latest;
            }
        }
    }
}

/// One user's exploration of one resource
pub struct ExplorationSession {
    id: Uuid,
    resource_id: String,
    memo: RwLock<Option<SchemaMemo>>,
    generation: watch::Sender<u64>,
    latest: Mutex<Option<AppliedView>>,
}

impl ExplorationSession {
    /// Create a new session on a resource
    pub fn new(resource_id: impl Into<String>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            id: Uuid::new_v4(),
            resource_id: resource_id.into(),
            memo: RwLock::new(None),
            generation,
            latest: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Start a request, superseding any request still in flight
    pub fn begin_request(&self) -> RequestTicket {
        let mut generation = 0;
        self.generation.send_modify(|current| {
            *current += 1;
            generation = *current;
        });
        RequestTicket {
            generation,
            receiver: self.generation.subscribe(),
        }
    }

    pub fn current_generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Apply a finished request's payload unless a newer request has started
    pub fn apply(
        &self,
        ticket: &RequestTicket,
        payload: ExplorerPayload,
    ) -> Result<ExplorerPayload, AdapterError> {
        let mut latest = self.latest.lock();
        let current = self.current_generation();
        if ticket.generation != current {
            return Err(AdapterError::Superseded { generation: current });
        }
        *latest = Some(AppliedView {
            generation: ticket.generation,
            payload: payload.clone(),
        });
        Ok(payload)
    }

    /// Payload of the newest request that completed
    pub fn latest_view(&self) -> Option<AppliedView> {
        self.latest.lock().clone()
    }

    pub fn schema_memo(&self) -> Option<SchemaMemo> {
        self.memo.read().clone()
    }

    /// Epoch of the memoized schema, 0 before the first inference
    pub fn current_epoch(&self) -> u64 {
        self.memo.read().as_ref().map_or(0, |memo| memo.epoch)
    }

    /// Memoize a freshly inferred schema under the next epoch
    pub fn store_memo(
        &self,
        schema: Schema,
        plan: SamplePlan,
        version: Option<String>,
        sample_rows: usize,
    ) -> SchemaMemo {
        let mut memo = self.memo.write();
        let epoch = memo.as_ref().map_or(1, |previous| previous.epoch + 1);
        let fresh = SchemaMemo {
            schema: Arc::new(schema),
            plan,
            version,
            epoch,
            sample_rows,
        };
        *memo = Some(fresh.clone());
        fresh
    }
}
