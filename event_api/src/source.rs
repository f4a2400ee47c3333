use std::{fmt, sync::Arc};

use crate::event::Event;

/// Optional argument qualifying a subscription, e.g. a device path.
pub type SourceArg = Option<String>;

/// A long-running producer of events for one `(name, arg)` key.
pub trait EventSource: Send + Sync {
    /// Production loop. Blocks until cancelled.
    ///
    /// Returning without having been cancelled retires the instance: either
    /// after [`Teardown::request`] (nothing left to produce) or with an error
    /// (fatal failure). Transient failures must be retried inside the loop.
    fn process(&self) -> anyhow::Result<()>;

    /// Ask [`process`](EventSource::process) to stop.
    ///
    /// Called with the broker lock held: must not block and must not call
    /// back into the broker. It has to unblock any I/O the loop is waiting on.
    fn cancel(&self);
}

/// Callback a producer uses to publish one event to its subscribers.
#[derive(Clone)]
pub struct Emitter(Arc<dyn Fn(Event) + Send + Sync>);

impl Emitter {
    pub fn new(f: impl Fn(Event) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn emit(&self, event: Event) {
        (self.0)(event)
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Emitter")
    }
}

/// Callback a producer uses to retire itself voluntarily.
#[derive(Clone)]
pub struct Teardown(Arc<dyn Fn() + Send + Sync>);

impl Teardown {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Unsubscribe everyone interested in this producer and drop its entry.
    pub fn request(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Teardown")
    }
}

/// Everything a factory receives when the broker needs a new instance.
#[derive(Debug, Clone)]
pub struct SourceInit {
    pub name: String,
    pub arg: SourceArg,
    pub emitter: Emitter,
    pub teardown: Teardown,
}

/// Constructs [`EventSource`] instances for one registered name.
pub trait SourceFactory: Send + Sync {
    /// Called with the broker lock held. The emitter and teardown in `init`
    /// must not be used before `create` returns; the loop starts afterwards
    /// in [`EventSource::process`].
    fn create(&self, init: SourceInit) -> anyhow::Result<Arc<dyn EventSource>>;
}

impl<F> SourceFactory for F
where
    F: Fn(SourceInit) -> anyhow::Result<Arc<dyn EventSource>> + Send + Sync,
{
    fn create(&self, init: SourceInit) -> anyhow::Result<Arc<dyn EventSource>> {
        self(init)
    }
}
