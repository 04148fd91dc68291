//! Dispatch router
//!
//! Outbound: typed request → registry → codec → transport → correlator, once
//! per selector and concurrently across selectors. Inbound: see [`inbound`].
//!
//! ```text
//! operator ──call()──► Dispatcher ──► TransportAdapter ──► device
//!                          │                  │
//!                     Correlator ◄── InboundRouter ◄── frames
//!                          │
//!                     CallHandle ──wait()──► typed response | DispatchError
//! ```

pub mod handle;
pub mod inbound;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::correlator::{Correlator, CorrelatorStats};
use crate::error::DispatchError;
use crate::handlers::Handlers;
use crate::ocpp::{CallId, OcppCall, OcppRequest, WireMessage};
use crate::persistence::{DeviceRepository, InMemoryRepository};
use crate::registry::SchemaRegistry;
use crate::transport::{Connection, DeviceSelector, FrameSink, SessionId, TransportAdapter, TransportKind};

pub use handle::{CallHandle, Canceller};
pub use inbound::InboundRouter;

type CallIdGenerator = Arc<dyn Fn() -> CallId + Send + Sync>;

/// Shortest period the sweeper runs at
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Entry point for operator commands
pub struct Dispatcher {
    registry: Arc<SchemaRegistry>,
    correlator: Arc<Correlator>,
    router: Arc<InboundRouter>,
    adapters: HashMap<TransportKind, Arc<dyn TransportAdapter>>,
    repository: Arc<dyn DeviceRepository>,
    config: DispatchConfig,
    call_ids: CallIdGenerator,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Frame sink the adapters deliver to
    pub fn inbound(&self) -> &Arc<InboundRouter> {
        &self.router
    }

    pub fn repository(&self) -> &Arc<dyn DeviceRepository> {
        &self.repository
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn stats(&self) -> CorrelatorStats {
        self.correlator.stats()
    }

    /// Send `request` to every selector; one handle per selector, same order
    pub async fn dispatch(&self, request: OcppRequest, selectors: &[DeviceSelector]) -> Vec<CallHandle> {
        let sends = selectors
            .iter()
            .map(|selector| self.dispatch_one(request.clone(), selector.clone()));
        join_all(sends).await
    }

    /// Typed variant of [`dispatch`](Self::dispatch)
    pub async fn call<R: OcppCall>(
        &self,
        request: R,
        selectors: &[DeviceSelector],
    ) -> Vec<CallHandle<R::Response>> {
        self.dispatch(request.into(), selectors)
            .await
            .into_iter()
            .map(CallHandle::typed)
            .collect()
    }

    /// Resolve device ids through the repository, then dispatch
    ///
    /// Unknown devices get a handle failing with `UnknownDevice`.
    pub async fn call_devices(&self, request: OcppRequest, device_ids: &[&str]) -> Vec<CallHandle> {
        let sends = device_ids.iter().map(|device_id| {
            let request = request.clone();
            async move {
                match self.repository.lookup_device_selector(device_id) {
                    Some(selector) => self.dispatch_one(request, selector).await,
                    None => {
                        warn!("No selector known for device {}", device_id);
                        let selector = DeviceSelector {
                            transport_kind: TransportKind::WebSocket,
                            device_id: device_id.to_string(),
                            protocol_version: request.version(),
                            identity_tag: crate::transport::NO_ENDPOINT.to_string(),
                        };
                        CallHandle::failed(selector, DispatchError::UnknownDevice(device_id.to_string()))
                    }
                }
            }
        });
        join_all(sends).await
    }

    /// Selector of a device as known to the repository
    pub fn lookup_device_selector(&self, device_id: &str) -> Result<DeviceSelector, DispatchError> {
        self.repository
            .lookup_device_selector(device_id)
            .ok_or_else(|| DispatchError::UnknownDevice(device_id.to_string()))
    }

    async fn dispatch_one(&self, request: OcppRequest, selector: DeviceSelector) -> CallHandle {
        match self.try_dispatch(&request, &selector).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{} to {} failed before sending: {}", request.action(), selector, e);
                CallHandle::failed(selector, e)
            }
        }
    }

    async fn try_dispatch(
        &self,
        request: &OcppRequest,
        selector: &DeviceSelector,
    ) -> Result<CallHandle, DispatchError> {
        let pair = self
            .registry
            .resolve_action_and_response_shape(request, selector.protocol_version)?;
        let adapter = self.adapters.get(&selector.transport_kind).ok_or_else(|| {
            DispatchError::Transport(format!("no {} adapter configured", selector.transport_kind))
        })?;
        let payload = request.to_payload()?;

        let session = adapter.open_session(selector).await?;
        let call_id = (self.call_ids)();
        let deadline = Instant::now() + self.config.call_timeout;
        let rx = self.correlator.register(
            session,
            call_id.clone(),
            selector.clone(),
            pair.action,
            pair.response,
            deadline,
        )?;
        let handle = CallHandle::pending(
            selector.clone(),
            session,
            call_id.clone(),
            deadline,
            rx,
            self.correlator.clone(),
        );

        debug!("Sending {} {} to {}", pair.action, call_id, selector);
        let message = WireMessage::call(call_id.clone(), pair.action, payload);
        if adapter.is_synchronous() {
            // Round trips run on their own task so other selectors are not held up
            tokio::spawn(run_exchange(
                adapter.clone(),
                self.correlator.clone(),
                selector.clone(),
                session,
                call_id,
                message,
                deadline,
            ));
        } else {
            match adapter.send(selector, session, message).await {
                Ok(()) => self.correlator.mark_sent(session, &call_id),
                Err(e) => {
                    self.correlator.fail(session, &call_id, e);
                }
            }
        }

        Ok(handle)
    }

    /// Connection snapshot with the calls still pending on it
    pub fn connection(&self, device_id: &str) -> Option<Connection> {
        let mut connection = self
            .adapters
            .values()
            .find_map(|adapter| adapter.connection(device_id))?;
        connection.pending = self.correlator.pending_for_session(connection.session);
        Some(connection)
    }

    /// Periodically expire overdue calls and purge tombstones
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let correlator = self.correlator.clone();
        let mut period = self.config.sweep_interval;
        if period < MIN_SWEEP_INTERVAL {
            warn!("Sweep interval {:?} too short, using {:?}", period, MIN_SWEEP_INTERVAL);
            period = MIN_SWEEP_INTERVAL;
        }
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                correlator.sweep(Instant::now());
            }
        })
    }
}

/// One synchronous exchange, bounded by the call deadline
async fn run_exchange(
    adapter: Arc<dyn TransportAdapter>,
    correlator: Arc<Correlator>,
    selector: DeviceSelector,
    session: SessionId,
    call_id: CallId,
    message: WireMessage,
    deadline: Instant,
) {
    match tokio::time::timeout_at(deadline, adapter.send(&selector, session, message)).await {
        Ok(Ok(())) => {
            correlator.mark_sent(session, &call_id);
            // The exchange is over; nothing can answer this call any more
            correlator.fail(
                session,
                &call_id,
                DispatchError::Transport("exchange completed without a matching response".into()),
            );
        }
        Ok(Err(e)) => {
            correlator.fail(session, &call_id, e);
        }
        Err(_) => {
            warn!("Exchange {} with {} ran past its deadline", call_id, selector);
            correlator.expire(session, &call_id);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.adapters.keys().map(|k| k.to_string()).collect();
        kinds.sort();
        f.debug_struct("Dispatcher")
            .field("adapters", &kinds)
            .field("correlator", &self.correlator)
            .finish()
    }
}

/// Builder for the dispatcher
pub struct DispatcherBuilder {
    config: DispatchConfig,
    handlers: Handlers,
    adapters: Vec<Arc<dyn TransportAdapter>>,
    repository: Option<Arc<dyn DeviceRepository>>,
    call_ids: Option<CallIdGenerator>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: DispatchConfig::default(),
            handlers: Handlers::new(),
            adapters: Vec::new(),
            repository: None,
            call_ids: None,
        }
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Inbound handlers
    pub fn handlers(mut self, handlers: Handlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Add a transport adapter; the last one added per kind wins
    pub fn adapter(mut self, adapter: Arc<dyn TransportAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn repository(mut self, repository: Arc<dyn DeviceRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Replace the UUID call-id generator
    pub fn call_ids(mut self, generator: impl Fn() -> CallId + Send + Sync + 'static) -> Self {
        self.call_ids = Some(Arc::new(generator));
        self
    }

    pub fn build(self) -> Dispatcher {
        let registry = Arc::new(SchemaRegistry::new());
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(InMemoryRepository::new()));
        let correlator = Arc::new(
            Correlator::new(self.config.late_response_grace).with_recorder(repository.clone()),
        );
        let router = Arc::new(InboundRouter::new(
            registry.clone(),
            correlator.clone(),
            self.handlers,
        ));

        let mut adapters = HashMap::new();
        for adapter in self.adapters {
            adapter.on_receive(router.clone() as Arc<dyn FrameSink>);
            info!("Registered {} transport", adapter.kind());
            adapters.insert(adapter.kind(), adapter);
        }

        let call_ids = self
            .call_ids
            .unwrap_or_else(|| Arc::new(|| Uuid::new_v4().to_string()));

        Dispatcher {
            registry,
            correlator,
            router,
            adapters,
            repository,
            config: self.config,
            call_ids,
        }
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
