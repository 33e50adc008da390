//! Lifecycle event bus
//!
//! Each [`Analytics`](crate::Analytics) instance owns one [`Emitter`].
//! Listeners subscribe to a [`Channel`] and receive every [`Emitted`] value
//! sent on it. A panicking listener is logged and skipped; it does not stop
//! the remaining listeners or the emitting code.

use crate::context::Context;
use crate::error::Error;
use crate::event::EventType;
use crate::settings::LoadSettings;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Named channel a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Initialize,
    Register,
    Deregister,
    Track,
    Page,
    Identify,
    Group,
    Alias,
    Screen,
    Error,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Initialize => "initialize",
            Channel::Register => "register",
            Channel::Deregister => "deregister",
            Channel::Track => "track",
            Channel::Page => "page",
            Channel::Identify => "identify",
            Channel::Group => "group",
            Channel::Alias => "alias",
            Channel::Screen => "screen",
            Channel::Error => "error",
        }
    }

    /// Channel that announces successful delivery of an event of `event_type`.
    pub fn for_event_type(event_type: EventType) -> Self {
        match event_type {
            EventType::Track => Channel::Track,
            EventType::Page => Channel::Page,
            EventType::Identify => Channel::Identify,
            EventType::Group => Channel::Group,
            EventType::Alias => Channel::Alias,
            EventType::Screen => Channel::Screen,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of an emitted error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// An event settled without being delivered
    DeliveryFailure,
    /// A plugin failed to load during registration
    PluginLoad,
    Unknown,
}

/// Payload of the `error` channel.
#[derive(Debug, Clone)]
pub struct EmittedError {
    pub code: ErrorCode,
    pub reason: Arc<Error>,
    pub ctx: Option<Context>,
}

/// A value sent on the bus.
#[derive(Debug, Clone)]
pub enum Emitted {
    Initialize(LoadSettings),
    /// Names of the plugins that were registered
    Register(Vec<String>),
    /// Names of the plugins that were removed
    Deregister(Vec<String>),
    /// A context that was delivered; the channel follows its event type
    Dispatched(Context),
    Error(EmittedError),
}

impl Emitted {
    pub fn channel(&self) -> Channel {
        match self {
            Emitted::Initialize(_) => Channel::Initialize,
            Emitted::Register(_) => Channel::Register,
            Emitted::Deregister(_) => Channel::Deregister,
            Emitted::Dispatched(ctx) => Channel::for_event_type(ctx.event.event_type),
            Emitted::Error(_) => Channel::Error,
        }
    }
}

/// Handle returned by [`Emitter::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Emitted) + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

/// Per-instance pub/sub for lifecycle events.
#[derive(Default)]
pub struct Emitter {
    channels: Mutex<HashMap<Channel, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, channel: Channel, listener: F) -> ListenerId
    where
        F: Fn(&Emitted) + Send + Sync + 'static,
    {
        self.subscribe(channel, false, Arc::new(listener))
    }

    /// Like [`on`](Self::on), but the listener is removed after its first call.
    pub fn once<F>(&self, channel: Channel, listener: F) -> ListenerId
    where
        F: Fn(&Emitted) + Send + Sync + 'static,
    {
        self.subscribe(channel, true, Arc::new(listener))
    }

    /// Remove a listener. Returns `false` if it was not subscribed.
    pub fn off(&self, channel: Channel, id: ListenerId) -> bool {
        let mut channels = self.lock();
        let Some(subs) = channels.get_mut(&channel) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    pub fn listener_count(&self, channel: Channel) -> usize {
        self.lock().get(&channel).map_or(0, Vec::len)
    }

    /// Deliver `emitted` to every listener of its channel.
    ///
    /// Listeners run on the calling task, outside the emitter lock, so they
    /// may subscribe or emit themselves.
    pub fn emit(&self, emitted: &Emitted) {
        let channel = emitted.channel();
        let subs = {
            let mut channels = self.lock();
            let Some(subs) = channels.get_mut(&channel) else {
                return;
            };
            let current = subs.clone();
            subs.retain(|s| !s.once);
            current
        };

        for sub in subs {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (sub.listener)(emitted);
            }));
            if result.is_err() {
                tracing::error!(channel = %channel, "Event listener panicked");
            }
        }
    }

    fn subscribe(&self, channel: Channel, once: bool, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().entry(channel).or_default().push(Subscription {
            id,
            once,
            listener,
        });
        id
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Channel, Vec<Subscription>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
