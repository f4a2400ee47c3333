#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use event_api::{Device, Emitter, Event, EventSource, SourceFactory, SourceInit, Teardown};
use eventd::{App, SubscriptionIdent};
use parking_lot::{Condvar, Mutex};

pub const WAIT: Duration = Duration::from_secs(5);

/// Poll `cond` until it holds or `WAIT` elapses.
pub fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn device_event(name: &str) -> Event {
    Event::DeviceAttached(Device::new(name, format!("Device {name} attached")))
}

/// App that records everything the broker hands it.
#[derive(Default)]
pub struct RecordingApp {
    pub events: Mutex<Vec<(String, Event)>>,
    pub ended: Mutex<Vec<SubscriptionIdent>>,
}

impl RecordingApp {
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl App for RecordingApp {
    fn send_event(&self, name: &str, event: &Event) {
        self.events.lock().push((name.to_string(), event.clone()));
    }

    fn subscription_ended(&self, ident: &SubscriptionIdent) {
        self.ended.lock().push(ident.clone());
    }
}

#[derive(Default)]
struct GateState {
    entered: bool,
    released: bool,
}

/// App whose deliveries block until [`GatedApp::release`], so a test can act
/// while a fan-out is in flight.
#[derive(Default)]
pub struct GatedApp {
    delivered: AtomicUsize,
    state: Mutex<GateState>,
    cond: Condvar,
}

impl GatedApp {
    /// Wait until some delivery is blocked in `send_event`.
    pub fn wait_entered(&self) -> bool {
        let mut state = self.state.lock();
        let deadline = Instant::now() + WAIT;
        while !state.entered {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return state.entered;
            }
        }
        true
    }

    pub fn release(&self) {
        self.state.lock().released = true;
        self.cond.notify_all();
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl App for GatedApp {
    fn send_event(&self, _name: &str, _event: &Event) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.entered = true;
        self.cond.notify_all();
        while !state.released {
            self.cond.wait(&mut state);
        }
    }
}

/// How a [`ManualSource`] behaves once its loop starts.
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Block until cancelled or told to finish.
    UntilCancelled,
    /// Return an error straight away.
    Fail,
}

/// Counters shared by every instance a test factory builds.
#[derive(Default)]
pub struct Tally {
    created: AtomicUsize,
    started: AtomicUsize,
    cancelled: AtomicUsize,
    stopped: AtomicUsize,
    instances: Mutex<Vec<Arc<ManualSource>>>,
}

impl Tally {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn instance(&self, idx: usize) -> Arc<ManualSource> {
        self.instances.lock()[idx].clone()
    }

    pub fn emitter(&self, idx: usize) -> Emitter {
        self.instance(idx).init.emitter.clone()
    }

    pub fn teardown(&self, idx: usize) -> Teardown {
        self.instance(idx).init.teardown.clone()
    }
}

#[derive(Default)]
struct Flags {
    cancelled: bool,
    finish: bool,
}

pub struct ManualSource {
    tally: Arc<Tally>,
    behaviour: Behaviour,
    init: SourceInit,
    flags: Mutex<Flags>,
    wake: Condvar,
}

impl ManualSource {
    /// Make the loop retire itself through its teardown callback.
    pub fn finish(&self) {
        self.flags.lock().finish = true;
        self.wake.notify_all();
    }
}

impl EventSource for ManualSource {
    fn process(&self) -> anyhow::Result<()> {
        self.tally.started.fetch_add(1, Ordering::SeqCst);
        let outcome = match self.behaviour {
            Behaviour::Fail => Err(anyhow::anyhow!("source failed on purpose")),
            Behaviour::UntilCancelled => {
                let mut flags = self.flags.lock();
                while !flags.cancelled && !flags.finish {
                    self.wake.wait(&mut flags);
                }
                if !flags.cancelled {
                    drop(flags);
                    self.init.teardown.request();
                }
                Ok(())
            }
        };
        self.tally.stopped.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    fn cancel(&self) {
        self.tally.cancelled.fetch_add(1, Ordering::SeqCst);
        self.flags.lock().cancelled = true;
        self.wake.notify_all();
    }
}

/// Factory building [`ManualSource`]s that report to `tally`.
pub fn factory(tally: &Arc<Tally>, behaviour: Behaviour) -> impl SourceFactory {
    let tally = tally.clone();
    move |init: SourceInit| -> anyhow::Result<Arc<dyn EventSource>> {
        tally.created.fetch_add(1, Ordering::SeqCst);
        let source = Arc::new(ManualSource {
            tally: tally.clone(),
            behaviour,
            init,
            flags: Mutex::new(Flags::default()),
            wake: Condvar::new(),
        });
        tally.instances.lock().push(source.clone());
        let source: Arc<dyn EventSource> = source;
        Ok(source)
    }
}
