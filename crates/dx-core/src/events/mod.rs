use std::any::{Any, TypeId};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

/// Adapter-wide event bus the Host Portal can observe
pub struct EventBus {
    handlers: Arc<Mutex<AHashMap<TypeId, Vec<Box<dyn EventHandler>>>>>,
}

/// Event trait that all events must implement
pub trait Event: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
}

/// Handler trait for event handlers
pub trait EventHandler: Send + Sync {
    fn handle(&mut self, event: &dyn Event);
}

/// Events emitted by exploration sessions
pub mod events {
    use super::Event;

    /// A session was opened on a resource
    #[derive(Debug, Clone)]
    pub struct SessionOpened {
        pub session_id: String,
        pub resource_id: String,
    }

    /// A schema was inferred (or re-inferred after a version change)
    #[derive(Debug, Clone)]
    pub struct SchemaInferred {
        pub session_id: String,
        pub column_count: usize,
        pub sample_rows: usize,
        pub epoch: u64,
    }

    /// A window was fetched and applied
    #[derive(Debug, Clone)]
    pub struct WindowFetched {
        pub session_id: String,
        pub offset: usize,
        pub rows: usize,
    }

    /// Filter or sort had to be evaluated in the adapter
    #[derive(Debug, Clone)]
    pub struct DegradedScan {
        pub store: String,
        pub local_filter: bool,
        pub local_sort: bool,
        pub rows_scanned: usize,
        /// Peak number of rows held for a local sort
        pub rows_buffered: usize,
    }

    /// A transient store failure is being retried
    #[derive(Debug, Clone)]
    pub struct FetchRetried {
        pub store: String,
        pub attempt: u32,
        pub error: String,
    }

    /// A request lost to a newer one on the same session
    #[derive(Debug, Clone)]
    pub struct RequestSuperseded {
        pub session_id: String,
        pub generation: u64,
    }

    /// A session was discarded
    #[derive(Debug, Clone)]
    pub struct SessionClosed {
        pub session_id: String,
    }

    macro_rules! impl_event {
        ($($t:ty),*) => {
            $(
                impl Event for $t {
                    fn as_any(&self) -> &dyn std::any::Any {
                        self
                    }
                }
            )*
        }
    }

    impl_event!(
        SessionOpened,
        SchemaInferred,
        WindowFetched,
        DegradedScan,
        FetchRetried,
        RequestSuperseded,
        SessionClosed
    );
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(AHashMap::new())),
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe<E: Event>(&self, handler: Box<dyn EventHandler>) {
        let type_id = TypeId::of::<E>();
        self.handlers.lock().entry(type_id).or_default().push(handler);
    }

    /// Subscribe a closure that receives the concrete event type
    pub fn subscribe_fn<E, F>(&self, mut f: F)
    where
        E: Event,
        F: FnMut(&E) + Send + Sync + 'static,
    {
        self.subscribe::<E>(handler_from_fn(move |event: &dyn Event| {
            if let Some(event) = event.as_any().downcast_ref::<E>() {
                f(event);
            }
        }));
    }

    /// Publish an event to every handler of its type
    pub fn publish<E: Event>(&self, event: E) {
        let type_id = TypeId::of::<E>();
        let mut handlers = self.handlers.lock();

        if let Some(event_handlers) = handlers.get_mut(&type_id) {
            for handler in event_handlers.iter_mut() {
                handler.handle(&event);
            }
        }
    }

    /// Number of handlers registered for an event type
    pub fn handler_count<E: Event>(&self) -> usize {
        self.handlers
            .lock()
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper struct for creating event handlers from closures
pub struct ClosureEventHandler<F> {
    handler: F,
}

impl<F> EventHandler for ClosureEventHandler<F>
where
    F: FnMut(&dyn Event) + Send + Sync,
{
    fn handle(&mut self, event: &dyn Event) {
        (self.handler)(event);
    }
}

/// Create an event handler from a closure
pub fn handler_from_fn<F>(f: F) -> Box<dyn EventHandler>
where
    F: FnMut(&dyn Event) + Send + Sync + 'static,
{
    Box::new(ClosureEventHandler { handler: f })
}
