//! DispatchClient - process-wide entry point
//!
//! Maps every subscription name onto its physical topic and keeps at most
//! one manager per topic. A manager is created on the first registration for
//! its topic and retired as soon as it serves nothing, either right after a
//! failed registration or deregistration, or from the idle reaper when
//! evictions emptied it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use contracts::{
    ChannelName, DispatchConfig, PhysicalTopic, Position, SubscriptionPolicy, SuffixNaming,
    TopicNaming, Transport,
};

use crate::error::{DispatchError, Result};
use crate::lock;
use crate::manager::DispatcherManager;
use crate::target::TargetReceiver;

/// Builder for creating a [`DispatchClient`]
pub struct DispatchClientBuilder<T: Transport> {
    transport: T,
    config: DispatchConfig,
    naming: Arc<dyn TopicNaming>,
}

impl<T: Transport> DispatchClientBuilder<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: DispatchConfig::default(),
            naming: Arc::new(SuffixNaming),
        }
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the subscription name to physical topic transformation
    pub fn naming(mut self, naming: impl TopicNaming + 'static) -> Self {
        self.naming = Arc::new(naming);
        self
    }

    /// Build the client and start its idle reaper
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> DispatchClient<T> {
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            transport: Arc::new(self.transport),
            naming: self.naming,
            config: self.config,
            managers: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            idle_tx,
        });

        let reaper = tokio::spawn(reap_idle(
            Arc::downgrade(&inner),
            idle_rx,
            inner.cancel.clone(),
        ));

        DispatchClient {
            inner,
            reaper: Mutex::new(Some(reaper)),
        }
    }
}

struct ClientInner<T: Transport> {
    transport: Arc<T>,
    naming: Arc<dyn TopicNaming>,
    config: DispatchConfig,
    managers: Mutex<HashMap<PhysicalTopic, Arc<DispatcherManager<T>>>>,
    /// Parent of every manager token
    cancel: CancellationToken,
    closed: AtomicBool,
    idle_tx: mpsc::UnboundedSender<PhysicalTopic>,
}

impl<T: Transport> ClientInner<T> {
    fn get_or_create(&self, topic: &PhysicalTopic) -> Result<Arc<DispatcherManager<T>>> {
        let mut managers = lock(&self.managers);
        // Checked under the registry lock so `close` cannot miss a new manager
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::ClientClosed);
        }
        let manager = managers.entry(topic.clone()).or_insert_with(|| {
            debug!(%topic, "Creating dispatcher manager");
            DispatcherManager::new(topic.clone(), Arc::clone(&self.transport), self.config.clone())
                .with_parent(&self.cancel)
                .with_idle_notifier(self.idle_tx.clone())
                .start()
        });
        Ok(Arc::clone(manager))
    }

    fn remove_if_same(&self, topic: &PhysicalTopic, manager: &Arc<DispatcherManager<T>>) -> bool {
        let mut managers = lock(&self.managers);
        match managers.get(topic) {
            Some(current) if Arc::ptr_eq(current, manager) => {
                managers.remove(topic);
                true
            }
            _ => false,
        }
    }

    /// Retire, close and evict `manager` if it serves nothing
    async fn retire_if_idle(&self, topic: &PhysicalTopic, manager: &Arc<DispatcherManager<T>>) {
        if !manager.try_retire() {
            return;
        }
        manager.close().await;
        if self.remove_if_same(topic, manager) {
            info!(%topic, "Idle dispatcher manager evicted");
        }
    }

    fn manager(&self, topic: &PhysicalTopic) -> Option<Arc<DispatcherManager<T>>> {
        lock(&self.managers).get(topic).cloned()
    }
}

impl<T: Transport> Drop for ClientInner<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Shared-consumer fan-out client
///
/// ```
/// use contracts::{DispatchConfig, Position, SubscriptionPolicy};
/// use dispatcher::DispatchClient;
/// use transport::MemoryTransport;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let transport = MemoryTransport::default();
/// let client = DispatchClient::builder(transport.clone())
///     .config(DispatchConfig::default())
///     .build();
///
/// let mut rx = client
///     .register("p0_v1", None, SubscriptionPolicy::Earliest)
///     .await
///     .unwrap();
/// transport.append("p0", "p0_v1", "hello");
///
/// let batch = rx.recv().await.unwrap();
/// assert_eq!(batch.begin, Position::ZERO);
/// assert_eq!(batch.records.len(), 1);
///
/// client.close().await;
/// # });
/// ```
pub struct DispatchClient<T: Transport> {
    inner: Arc<ClientInner<T>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> DispatchClient<T> {
    pub fn builder(transport: T) -> DispatchClientBuilder<T> {
        DispatchClientBuilder::new(transport)
    }

    /// Client with default configuration and naming
    pub fn new(transport: T) -> Self {
        Self::builder(transport).build()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.inner.transport
    }

    /// Physical topic `name` is multiplexed onto
    pub fn physical_topic(&self, name: &ChannelName) -> PhysicalTopic {
        self.inner.naming.physical_topic(name)
    }

    /// Register a subscription
    ///
    /// An explicit `position` wins over `policy`; with no position,
    /// `Earliest` and `Latest` pick the corresponding end of the retained
    /// range.
    ///
    /// # Errors
    /// - `DuplicateRegistration` if `name` is already live
    /// - `TransportUnavailable` if the transport cannot be reached
    /// - `PositionInvalid` if the start position is not retrievable
    /// - `ClientClosed` after [`close`](Self::close)
    #[instrument(
        name = "client_register",
        skip(self, name),
        fields(channel = tracing::field::Empty, topic = tracing::field::Empty)
    )]
    pub async fn register(
        &self,
        name: impl Into<ChannelName>,
        position: Option<Position>,
        policy: SubscriptionPolicy,
    ) -> Result<TargetReceiver> {
        let name = name.into();
        let topic = self.physical_topic(&name);
        let span = tracing::Span::current();
        span.record("channel", name.as_str());
        span.record("topic", topic.as_str());

        loop {
            let manager = self.inner.get_or_create(&topic)?;
            match manager.add(&name, position, policy).await {
                Ok(receiver) => {
                    info!(start = %receiver.start(), "Subscription registered");
                    return Ok(receiver);
                }
                Err(DispatchError::ManagerClosed { .. }) => {
                    // The retiring caller evicts it once closed; a fresh
                    // manager is only created after that
                    manager.closed().await;
                    self.inner.remove_if_same(&topic, &manager);
                    if self.inner.closed.load(Ordering::SeqCst) {
                        return Err(DispatchError::ClientClosed);
                    }
                    debug!("Manager retired during registration, retrying");
                }
                Err(err) => {
                    warn!(error = %err, "Registration failed");
                    self.inner.retire_if_idle(&topic, &manager).await;
                    return Err(err);
                }
            }
        }
    }

    /// Deregister a subscription; unknown names are a no-op
    #[instrument(name = "client_deregister", skip(self, name))]
    pub async fn deregister(&self, name: impl Into<ChannelName>) {
        let name = name.into();
        if self.inner.closed.load(Ordering::SeqCst) {
            warn!(channel = %name, "Deregister on closed client ignored");
            return;
        }

        let topic = self.physical_topic(&name);
        let Some(manager) = self.inner.manager(&topic) else {
            debug!(channel = %name, %topic, "Deregister of unknown subscription");
            return;
        };

        if manager.remove(&name).await {
            info!(channel = %name, %topic, "Subscription deregistered");
            self.inner.retire_if_idle(&topic, &manager).await;
        }
    }

    /// Close every manager and stop the reaper
    ///
    /// Blocks until every manager released its consumers and closed its
    /// queues. Later calls only log a warning.
    #[instrument(name = "client_close", skip(self))]
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            warn!("Dispatch client already closed");
            return;
        }

        let managers: Vec<_> = lock(&self.inner.managers).drain().map(|(_, m)| m).collect();
        let count = managers.len();

        let mut closing = JoinSet::new();
        for manager in managers {
            closing.spawn(async move { manager.close().await });
        }
        while let Some(joined) = closing.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Manager close task failed");
            }
        }

        self.inner.cancel.cancel();
        let reaper = lock(&self.reaper).take();
        if let Some(reaper) = reaper {
            if let Err(e) = reaper.await {
                warn!(error = %e, "Idle reaper task failed");
            }
        }

        info!(managers = count, "Dispatch client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Managers currently registered
    pub fn num_managers(&self) -> usize {
        lock(&self.inner.managers).len()
    }

    pub fn manager(&self, topic: &PhysicalTopic) -> Option<Arc<DispatcherManager<T>>> {
        self.inner.manager(topic)
    }

    /// Live subscriptions on `topic` (0 when no manager exists)
    pub fn num_targets(&self, topic: &PhysicalTopic) -> usize {
        self.manager(topic).map_or(0, |manager| manager.num())
    }

    /// Dispatchers serving `topic` (0 when no manager exists)
    pub fn dispatcher_count(&self, topic: &PhysicalTopic) -> usize {
        self.manager(topic).map_or(0, |manager| manager.dispatcher_count())
    }

    /// Topics with a manager, sorted
    pub fn topics(&self) -> Vec<PhysicalTopic> {
        let mut topics: Vec<_> = lock(&self.inner.managers).keys().cloned().collect();
        topics.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        topics
    }
}

/// Retire managers that reported themselves idle
async fn reap_idle<T: Transport>(
    inner: Weak<ClientInner<T>>,
    mut idle_rx: mpsc::UnboundedReceiver<PhysicalTopic>,
    cancel: CancellationToken,
) {
    loop {
        let topic = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            topic = idle_rx.recv() => match topic {
                Some(topic) => topic,
                None => break,
            },
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        if let Some(manager) = inner.manager(&topic) {
            inner.retire_if_idle(&topic, &manager).await;
        }
    }
    debug!("Idle reaper stopped");
}
