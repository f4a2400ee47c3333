use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use event_api::{Emitter, Event, EventSource, SourceArg, SourceFactory, SourceInit, Teardown};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Caller supplied identity of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionIdent(String);

impl SubscriptionIdent {
    pub fn new(ident: impl Into<String>) -> Self {
        Self(ident.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SubscriptionIdent {
    fn from(ident: &str) -> Self {
        Self::new(ident)
    }
}

impl From<String> for SubscriptionIdent {
    fn from(ident: String) -> Self {
        Self(ident)
    }
}

impl fmt::Display for SubscriptionIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receiving side of a subscription, typically one client connection.
pub trait App: Send + Sync {
    /// Deliver an event published by the event source `name`.
    ///
    /// Runs on the producer's thread; must not block for long.
    fn send_event(&self, name: &str, event: &Event);

    /// The subscription `ident` ended without the app asking for it.
    fn subscription_ended(&self, _ident: &SubscriptionIdent) {}
}

pub type AppHandle = Arc<dyn App>;

fn same_app(a: &AppHandle, b: &AppHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Identifies the shared instance serving a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProducerKey {
    pub name: String,
    pub arg: SourceArg,
}

impl ProducerKey {
    pub fn new(name: impl Into<String>, arg: SourceArg) -> Self {
        Self {
            name: name.into(),
            arg,
        }
    }
}

impl fmt::Display for ProducerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}:{}", self.name, arg),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("event source {0} is already registered")]
    DuplicateRegistration(String),
    #[error("ident {0} is already used")]
    DuplicateIdent(SubscriptionIdent),
    #[error("unknown event source {0}")]
    UnknownEventSource(String),
    #[error("unknown ident {0}")]
    UnknownIdent(SubscriptionIdent),
    #[error("failed to start event source {key}")]
    Start {
        key: ProducerKey,
        #[source]
        source: anyhow::Error,
    },
    #[error("broker is shut down")]
    ShutDown,
}

struct IdentData {
    app: AppHandle,
    key: ProducerKey,
}

struct ProducerEntry {
    /// Distinguishes this instance from earlier ones for the same key.
    id: u64,
    instance: Arc<dyn EventSource>,
    subscribers: HashSet<SubscriptionIdent>,
    handle: JoinHandle<()>,
}

type Ended = Vec<(SubscriptionIdent, AppHandle)>;

#[derive(Default)]
struct State {
    instances: HashMap<ProducerKey, ProducerEntry>,
    idents: HashMap<SubscriptionIdent, IdentData>,
    next_id: u64,
    closed: bool,
}

impl State {
    /// Remove `ident` from the subscribers of `key`, cancelling the instance
    /// when nobody is left.
    fn detach(&mut self, ident: &SubscriptionIdent, key: &ProducerKey) {
        let Some(entry) = self.instances.get_mut(key) else {
            return;
        };
        entry.subscribers.remove(ident);
        if !entry.subscribers.is_empty() {
            return;
        }
        if let Some(entry) = self.instances.remove(key) {
            debug!(%key, "canceling instance of event source as the last subscriber unsubscribed");
            entry.instance.cancel();
        }
    }

    /// App behind `ident`, provided it is still subscribed to instance `id`
    /// of `key`.
    fn resolve(&self, ident: &SubscriptionIdent, key: &ProducerKey, id: u64) -> Option<AppHandle> {
        let entry = self.instances.get(key)?;
        if entry.id != id || !entry.subscribers.contains(ident) {
            return None;
        }
        let data = self.idents.get(ident)?;
        (data.key == *key).then(|| data.app.clone())
    }

    /// Drop the entry for `key` and all its ledger rows, provided it still
    /// belongs to instance `id`.
    fn remove_instance(&mut self, key: &ProducerKey, id: u64) -> Option<Ended> {
        if !self.instances.get(key).is_some_and(|entry| entry.id == id) {
            return None;
        }
        let entry = self.instances.remove(key)?;
        let ended = entry
            .subscribers
            .into_iter()
            .filter_map(|ident| {
                let data = self.idents.remove(&ident)?;
                Some((ident, data.app))
            })
            .collect();
        Some(ended)
    }
}

/// Process-wide event source broker.
pub struct Broker {
    me: Weak<Broker>,
    sources: RwLock<HashMap<String, Arc<dyn SourceFactory>>>,
    state: Mutex<State>,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            sources: RwLock::new(HashMap::new()),
            state: Mutex::new(State::default()),
        })
    }

    /// Make `name` available to subscribers.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: impl SourceFactory + 'static,
    ) -> Result<(), BrokerError> {
        match self.sources.write().entry(name.into()) {
            Entry::Occupied(entry) => Err(BrokerError::DuplicateRegistration(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(name = %entry.key(), "registered event source");
                entry.insert(Arc::new(factory));
                Ok(())
            }
        }
    }

    /// Sorted names of the registered event sources.
    pub fn sources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Subscribe `ident` on behalf of `app` to the events of `name`/`arg`.
    ///
    /// Starts a new instance of the event source unless one is already
    /// running for that key.
    pub fn subscribe(
        &self,
        app: AppHandle,
        ident: impl Into<SubscriptionIdent>,
        name: &str,
        arg: SourceArg,
    ) -> Result<(), BrokerError> {
        let ident = ident.into();
        let key = ProducerKey::new(name, arg);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(BrokerError::ShutDown);
        }
        if state.idents.contains_key(&ident) {
            return Err(BrokerError::DuplicateIdent(ident));
        }
        let factory = self
            .sources
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownEventSource(name.to_string()))?;

        match state.instances.get_mut(&key) {
            Some(entry) => {
                trace!(%key, "re-using existing instance of event source");
                entry.subscribers.insert(ident.clone());
            }
            None => {
                trace!(%key, "creating new instance of event source");
                state.next_id += 1;
                let mut entry = self.start(&key, state.next_id, factory.as_ref())?;
                entry.subscribers.insert(ident.clone());
                state.instances.insert(key.clone(), entry);
            }
        }
        state.idents.insert(ident, IdentData { app, key });
        Ok(())
    }

    pub fn unsubscribe(&self, ident: &SubscriptionIdent) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let data = state
            .idents
            .remove(ident)
            .ok_or_else(|| BrokerError::UnknownIdent(ident.clone()))?;
        state.detach(ident, &data.key);
        Ok(())
    }

    /// Unsubscribe every ident owned by `app`. Idents already gone are skipped.
    pub fn unsubscribe_app(&self, app: &AppHandle) {
        let mut state = self.state.lock();
        let idents: Vec<SubscriptionIdent> = state
            .idents
            .iter()
            .filter(|(_, data)| same_app(&data.app, app))
            .map(|(ident, _)| ident.clone())
            .collect();
        for ident in idents {
            if let Some(data) = state.idents.remove(&ident) {
                state.detach(&ident, &data.key);
            }
        }
    }

    /// Cancel every instance, forget every subscription and wait up to
    /// `grace` for producer threads to exit. Later subscribes fail.
    pub fn shutdown(&self, grace: Duration) {
        let handles: Vec<(ProducerKey, JoinHandle<()>)> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.idents.clear();
            state
                .instances
                .drain()
                .map(|(key, entry)| {
                    entry.instance.cancel();
                    (key, entry.handle)
                })
                .collect()
        };
        let deadline = Instant::now() + grace;
        for (key, handle) in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if !handle.is_finished() {
                warn!(%key, "event source thread still running after shutdown");
            } else if handle.join().is_err() {
                warn!(%key, "event source thread panicked");
            }
        }
    }

    /// Number of live event source instances.
    pub fn instance_count(&self) -> usize {
        self.state.lock().instances.len()
    }

    /// Sorted subscribers of the instance for `name`/`arg`, if one is live.
    pub fn subscribers(&self, name: &str, arg: &SourceArg) -> Option<Vec<SubscriptionIdent>> {
        let key = ProducerKey::new(name, arg.clone());
        let state = self.state.lock();
        let entry = state.instances.get(&key)?;
        let mut idents: Vec<SubscriptionIdent> = entry.subscribers.iter().cloned().collect();
        idents.sort_unstable();
        Some(idents)
    }

    pub fn is_subscribed(&self, ident: &SubscriptionIdent) -> bool {
        self.state.lock().idents.contains_key(ident)
    }

    /// Construct an instance for `key` and start its production thread.
    fn start(
        &self,
        key: &ProducerKey,
        id: u64,
        factory: &dyn SourceFactory,
    ) -> Result<ProducerEntry, BrokerError> {
        let init = SourceInit {
            name: key.name.clone(),
            arg: key.arg.clone(),
            emitter: self.emitter(key, id),
            teardown: self.teardown(key, id),
        };
        let instance = factory.create(init).map_err(|source| BrokerError::Start {
            key: key.clone(),
            source,
        })?;

        let runner = instance.clone();
        let me = self.me.clone();
        let thread_key = key.clone();
        let handle = thread::Builder::new()
            .name(format!("evsrc {key}"))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| runner.process()))
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("event source panicked")));
                if let Some(broker) = me.upgrade() {
                    broker.finished(&thread_key, id, outcome);
                }
            })
            .map_err(|err| BrokerError::Start {
                key: key.clone(),
                source: err.into(),
            })?;

        Ok(ProducerEntry {
            id,
            instance,
            subscribers: HashSet::new(),
            handle,
        })
    }

    fn emitter(&self, key: &ProducerKey, id: u64) -> Emitter {
        let me = self.me.clone();
        let key = key.clone();
        Emitter::new(move |event| {
            if let Some(broker) = me.upgrade() {
                broker.dispatch(&key, id, &event);
            }
        })
    }

    fn teardown(&self, key: &ProducerKey, id: u64) -> Teardown {
        let me = self.me.clone();
        let key = key.clone();
        Teardown::new(move || {
            if let Some(broker) = me.upgrade() {
                broker.tear_down(&key, id);
            }
        })
    }

    /// Fan `event` out to every ident currently subscribed to `key`.
    fn dispatch(&self, key: &ProducerKey, id: u64, event: &Event) {
        let idents: Vec<SubscriptionIdent> = match self.state.lock().instances.get(key) {
            Some(entry) if entry.id == id => entry.subscribers.iter().cloned().collect(),
            _ => {
                trace!(%key, event_type = event.event_type(), "dropping event from retired instance");
                return;
            }
        };
        for ident in idents {
            let Some(app) = self.state.lock().resolve(&ident, key, id) else {
                trace!(%ident, "ident is gone");
                continue;
            };
            app.send_event(&key.name, event);
        }
    }

    /// Retire instance `id` of `key` at the producer's request. Does not
    /// cancel it: the producer is already on its way out.
    fn tear_down(&self, key: &ProducerKey, id: u64) -> bool {
        let Some(ended) = self.state.lock().remove_instance(key, id) else {
            return false;
        };
        debug!(%key, subscribers = ended.len(), "tearing down instance of event source");
        for (ident, app) in ended {
            app.subscription_ended(&ident);
        }
        true
    }

    /// Epilogue of a production thread.
    fn finished(&self, key: &ProducerKey, id: u64, outcome: anyhow::Result<()>) {
        match outcome {
            Ok(()) => debug!(%key, "event source stopped"),
            Err(err) => error!(%key, error = ?err, "event source failed"),
        }
        if self.tear_down(key, id) {
            warn!(%key, "event source exited while subscribed, its subscriptions were dropped");
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        for (key, entry) in self.state.get_mut().instances.drain() {
            debug!(%key, "canceling event source as the broker is dropped");
            entry.instance.cancel();
        }
    }
}
