//! Asynchronous event notifications and the observer registry.
//!
//! The daemon multiplexes unsolicited `650` notifications onto the same
//! stream as command replies. The connection task hands each decoded
//! notification to an [`EventRegistry`], which delivers it to every
//! matching observer in registration order. A failing observer never
//! prevents delivery to the observers after it; failures from one
//! dispatch are aggregated and funneled to the connection's
//! [`uncaught::Handler`](crate::uncaught::Handler).

use crate::protocol::Reply;
use crate::uncaught;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

/// Event types that can be subscribed to with SETEVENTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Circuit status changed.
    Circ,
    /// Stream status changed.
    Stream,
    /// OR connection status changed.
    OrConn,
    /// Bandwidth used in the last second.
    Bw,
    /// Debug log message.
    Debug,
    /// Info log message.
    Info,
    /// Notice log message.
    Notice,
    /// Warning log message.
    Warn,
    /// Error log message.
    Err,
    /// New descriptors available.
    NewDesc,
    /// New address mapping.
    AddrMap,
    /// Our descriptor changed.
    DescChanged,
    /// General status event.
    StatusGeneral,
    /// Client status event.
    StatusClient,
    /// Server status event.
    StatusServer,
    /// Guard node set changed.
    Guard,
    /// Network status changed.
    Ns,
    /// Stream bandwidth.
    StreamBw,
    /// Clients seen (bridge only).
    ClientsSeen,
    /// New consensus arrived.
    NewConsensus,
    /// Build timeout set.
    BuildTimeoutSet,
    /// Signal received.
    Signal,
    /// Configuration changed.
    ConfChanged,
    /// Minor circuit status change.
    CircMinor,
    /// Pluggable transport launched.
    TransportLaunched,
    /// Connection bandwidth.
    ConnBw,
    /// Circuit bandwidth.
    CircBw,
    /// Cell stats.
    CellStats,
    /// Hidden service descriptor event.
    HsDesc,
    /// Hidden service descriptor content.
    HsDescContent,
    /// Network liveness changed.
    NetworkLiveness,
    /// Pluggable transport log.
    PtLog,
    /// Pluggable transport status.
    PtStatus,
}

impl EventType {
    /// The SETEVENTS keyword for this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Circ => "CIRC",
            EventType::Stream => "STREAM",
            EventType::OrConn => "ORCONN",
            EventType::Bw => "BW",
            EventType::Debug => "DEBUG",
            EventType::Info => "INFO",
            EventType::Notice => "NOTICE",
            EventType::Warn => "WARN",
            EventType::Err => "ERR",
            EventType::NewDesc => "NEWDESC",
            EventType::AddrMap => "ADDRMAP",
            EventType::DescChanged => "DESCCHANGED",
            EventType::StatusGeneral => "STATUS_GENERAL",
            EventType::StatusClient => "STATUS_CLIENT",
            EventType::StatusServer => "STATUS_SERVER",
            EventType::Guard => "GUARD",
            EventType::Ns => "NS",
            EventType::StreamBw => "STREAM_BW",
            EventType::ClientsSeen => "CLIENTS_SEEN",
            EventType::NewConsensus => "NEWCONSENSUS",
            EventType::BuildTimeoutSet => "BUILDTIMEOUT_SET",
            EventType::Signal => "SIGNAL",
            EventType::ConfChanged => "CONF_CHANGED",
            EventType::CircMinor => "CIRC_MINOR",
            EventType::TransportLaunched => "TRANSPORT_LAUNCHED",
            EventType::ConnBw => "CONN_BW",
            EventType::CircBw => "CIRC_BW",
            EventType::CellStats => "CELL_STATS",
            EventType::HsDesc => "HS_DESC",
            EventType::HsDescContent => "HS_DESC_CONTENT",
            EventType::NetworkLiveness => "NETWORK_LIVENESS",
            EventType::PtLog => "PT_LOG",
            EventType::PtStatus => "PT_STATUS",
        }
    }
}

impl FromStr for EventType {
    type Err = crate::error::TorCtrlError;

    fn from_str(s: &str) -> Result<Self, crate::error::TorCtrlError> {
        match s.to_uppercase().as_str() {
            "CIRC" => Ok(EventType::Circ),
            "STREAM" => Ok(EventType::Stream),
            "ORCONN" => Ok(EventType::OrConn),
            "BW" => Ok(EventType::Bw),
            "DEBUG" => Ok(EventType::Debug),
            "INFO" => Ok(EventType::Info),
            "NOTICE" => Ok(EventType::Notice),
            "WARN" => Ok(EventType::Warn),
            "ERR" => Ok(EventType::Err),
            "NEWDESC" => Ok(EventType::NewDesc),
            "ADDRMAP" => Ok(EventType::AddrMap),
            "DESCCHANGED" => Ok(EventType::DescChanged),
            "STATUS_GENERAL" => Ok(EventType::StatusGeneral),
            "STATUS_CLIENT" => Ok(EventType::StatusClient),
            "STATUS_SERVER" => Ok(EventType::StatusServer),
            "GUARD" => Ok(EventType::Guard),
            "NS" => Ok(EventType::Ns),
            "STREAM_BW" => Ok(EventType::StreamBw),
            "CLIENTS_SEEN" => Ok(EventType::ClientsSeen),
            "NEWCONSENSUS" => Ok(EventType::NewConsensus),
            "BUILDTIMEOUT_SET" => Ok(EventType::BuildTimeoutSet),
            "SIGNAL" => Ok(EventType::Signal),
            "CONF_CHANGED" => Ok(EventType::ConfChanged),
            "CIRC_MINOR" => Ok(EventType::CircMinor),
            "TRANSPORT_LAUNCHED" => Ok(EventType::TransportLaunched),
            "CONN_BW" => Ok(EventType::ConnBw),
            "CIRC_BW" => Ok(EventType::CircBw),
            "CELL_STATS" => Ok(EventType::CellStats),
            "HS_DESC" => Ok(EventType::HsDesc),
            "HS_DESC_CONTENT" => Ok(EventType::HsDescContent),
            "NETWORK_LIVENESS" => Ok(EventType::NetworkLiveness),
            "PT_LOG" => Ok(EventType::PtLog),
            "PT_STATUS" => Ok(EventType::PtStatus),
            other => Err(crate::error::TorCtrlError::ParseError(format!(
                "unknown event type: {other}"
            ))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What an observer listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKey {
    /// A single event type.
    Typed(EventType),
    /// Every event on the connection.
    All,
}

impl EventKey {
    fn matches(&self, kind: Option<EventType>) -> bool {
        match self {
            EventKey::All => true,
            EventKey::Typed(t) => kind == Some(*t),
        }
    }
}

impl From<EventType> for EventKey {
    fn from(t: EventType) -> Self {
        EventKey::Typed(t)
    }
}

/// A decoded `650` notification.
#[derive(Debug, Clone)]
pub struct EventNotification {
    /// The raw event keyword, exactly as it appeared on the wire.
    pub keyword: String,
    /// The keyword resolved to a known event type, if recognized.
    pub kind: Option<EventType>,
    /// Everything after the keyword, extra lines joined with newlines.
    pub payload: String,
    /// The dot-terminated payload of the block, if the event carried one.
    pub data: Option<String>,
}

impl EventNotification {
    pub(crate) fn from_reply(reply: &Reply) -> Self {
        let first = reply.first_line();
        let (keyword, rest) = first.split_once(' ').unwrap_or((first, ""));

        let mut payload = rest.to_string();
        for line in reply.lines().iter().skip(1) {
            if !payload.is_empty() {
                payload.push('\n');
            }
            payload.push_str(&line.text);
        }

        EventNotification {
            keyword: keyword.to_string(),
            kind: EventType::from_str(keyword).ok(),
            payload,
            data: reply.data().map(str::to_string),
        }
    }
}

/// Where an observer's callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecPolicy {
    /// On the connection's delivery context, before the next observer.
    #[default]
    Immediate,
    /// On a spawned task; delivery order relative to other observers of
    /// the same dispatch is not guaranteed.
    Spawned,
}

type Callback = Arc<dyn Fn(&EventNotification) + Send + Sync>;

/// A registered callback for one event type or for all events.
#[derive(Clone)]
pub struct Observer {
    key: EventKey,
    tag: Option<String>,
    exec: ExecPolicy,
    is_static: bool,
    callback: Callback,
}

impl Observer {
    /// Observe a single event type or all events.
    pub fn new<F>(key: impl Into<EventKey>, callback: F) -> Self
    where
        F: Fn(&EventNotification) + Send + Sync + 'static,
    {
        Observer {
            key: key.into(),
            tag: None,
            exec: ExecPolicy::Immediate,
            is_static: false,
            callback: Arc::new(callback),
        }
    }

    /// Attach a tag for bulk removal.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Choose where the callback runs.
    pub fn exec(mut self, exec: ExecPolicy) -> Self {
        self.exec = exec;
        self
    }

    /// Mark the observer static: exempt from [`EventRegistry::clear`]
    /// and from bulk removal by event type. Intended for long-lived
    /// logging or monitoring callbacks.
    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("key", &self.key)
            .field("tag", &self.tag)
            .field("exec", &self.exec)
            .field("is_static", &self.is_static)
            .finish()
    }
}

/// Registration handle, unique per registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct Registered {
    id: ObserverId,
    observer: Observer,
}

/// Thread-safe observer registry with snapshot dispatch.
///
/// Dispatch iterates a snapshot of the registration list, so observers
/// may subscribe and unsubscribe concurrently (including from inside a
/// callback) without corrupting an in-progress delivery.
pub struct EventRegistry {
    observers: Mutex<Vec<Registered>>,
    next_id: AtomicU64,
    handler: uncaught::Handler,
}

impl EventRegistry {
    /// Create a registry funneling observer failures to `handler`.
    pub fn new(handler: uncaught::Handler) -> Self {
        EventRegistry {
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            handler,
        }
    }

    /// Register an observer. Observers are delivered to in registration
    /// order.
    pub fn subscribe(&self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .expect("observer registry lock poisoned")
            .push(Registered { id, observer });
        id
    }

    /// Remove a single observer, static or not. Returns whether it was
    /// present.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .lock()
            .expect("observer registry lock poisoned");
        let before = observers.len();
        observers.retain(|r| r.id != id);
        observers.len() != before
    }

    /// Remove every observer carrying `tag`, including static ones:
    /// a tag is an explicit target. Returns how many were removed.
    pub fn unsubscribe_tag(&self, tag: &str) -> usize {
        let mut observers = self
            .observers
            .lock()
            .expect("observer registry lock poisoned");
        let before = observers.len();
        observers.retain(|r| r.observer.tag.as_deref() != Some(tag));
        before - observers.len()
    }

    /// Remove every non-static observer for `key`. Returns how many
    /// were removed.
    pub fn unsubscribe_key(&self, key: EventKey) -> usize {
        let mut observers = self
            .observers
            .lock()
            .expect("observer registry lock poisoned");
        let before = observers.len();
        observers.retain(|r| r.observer.is_static || r.observer.key != key);
        before - observers.len()
    }

    /// Remove every non-static observer.
    pub fn clear(&self) {
        self.observers
            .lock()
            .expect("observer registry lock poisoned")
            .retain(|r| r.observer.is_static);
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.observers
            .lock()
            .expect("observer registry lock poisoned")
            .len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a notification to every matching observer, in
    /// registration order. A panicking callback is isolated; failures
    /// of immediate observers are aggregated into one report after the
    /// last observer has run, while each spawned observer reports its
    /// failure individually from its own task.
    pub fn dispatch(&self, notification: &EventNotification) {
        let matching: Vec<(ObserverId, ExecPolicy, Callback)> = {
            let observers = self
                .observers
                .lock()
                .expect("observer registry lock poisoned");
            observers
                .iter()
                .filter(|r| r.observer.key.matches(notification.kind))
                .map(|r| (r.id, r.observer.exec, r.observer.callback.clone()))
                .collect()
        };

        if notification.kind.is_none() {
            warn!(keyword = %notification.keyword, "unrecognized event keyword");
        }
        trace!(
            event = %notification.keyword,
            observers = matching.len(),
            "dispatching event"
        );

        let mut failures = uncaught::Suppressed::new(format!(
            "{} event dispatch",
            notification.keyword
        ));

        for (id, exec, callback) in matching {
            match exec {
                ExecPolicy::Immediate => {
                    let outcome = catch_unwind(AssertUnwindSafe(|| callback(notification)));
                    if let Err(panic) = outcome {
                        failures.push(format!("observer {id:?}: {}", panic_message(&*panic)));
                    }
                }
                ExecPolicy::Spawned => {
                    let notification = notification.clone();
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        let outcome =
                            catch_unwind(AssertUnwindSafe(|| callback(&notification)));
                        if let Err(panic) = outcome {
                            handler(uncaught::UncaughtError {
                                context: format!("{} event dispatch", notification.keyword),
                                primary: format!(
                                    "observer {id:?}: {}",
                                    panic_message(&*panic)
                                ),
                                suppressed: Vec::new(),
                            });
                        }
                    });
                }
            }
        }

        failures.finish(&self.handler);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Reply, ReplyLine};
    use crate::uncaught::UncaughtError;

    fn notification(keyword: &str, payload: &str) -> EventNotification {
        EventNotification {
            keyword: keyword.to_string(),
            kind: EventType::from_str(keyword).ok(),
            payload: payload.to_string(),
            data: None,
        }
    }

    fn capture_handler() -> (uncaught::Handler, Arc<Mutex<Vec<UncaughtError>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: uncaught::Handler = Arc::new(move |e| sink.lock().unwrap().push(e));
        (handler, seen)
    }

    #[test]
    fn event_type_round_trip() {
        assert_eq!(EventType::from_str("CIRC").unwrap(), EventType::Circ);
        assert_eq!(EventType::from_str("status_client").unwrap(), EventType::StatusClient);
        assert_eq!(EventType::StatusClient.as_str(), "STATUS_CLIENT");
        assert!(EventType::from_str("NO_SUCH_EVENT").is_err());
    }

    #[test]
    fn notification_from_reply() {
        let reply = Reply::new(vec![ReplyLine::parse("650 BW 1024 2048").unwrap()]).unwrap();
        let n = EventNotification::from_reply(&reply);
        assert_eq!(n.keyword, "BW");
        assert_eq!(n.kind, Some(EventType::Bw));
        assert_eq!(n.payload, "1024 2048");
    }

    #[test]
    fn notification_joins_extra_lines() {
        let reply = Reply::new(vec![
            ReplyLine::parse("650-CONF_CHANGED").unwrap(),
            ReplyLine::parse("650-SocksPort=9050").unwrap(),
            ReplyLine::parse("650 OK").unwrap(),
        ])
        .unwrap();
        let n = EventNotification::from_reply(&reply);
        assert_eq!(n.keyword, "CONF_CHANGED");
        assert_eq!(n.payload, "SocksPort=9050\nOK");
    }

    #[test]
    fn dispatch_in_registration_order() {
        let registry = EventRegistry::new(uncaught::ignore());
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = order.clone();
            registry.subscribe(Observer::new(EventType::Bw, move |_| {
                order.lock().unwrap().push(label);
            }));
        }

        registry.dispatch(&notification("BW", "1 2"));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_observer_is_isolated_and_aggregated() {
        let (handler, seen) = capture_handler();
        let registry = EventRegistry::new(handler);

        let delivered = Arc::new(Mutex::new(Vec::new()));
        let d1 = delivered.clone();
        registry.subscribe(Observer::new(EventType::StatusClient, move |n| {
            d1.lock().unwrap().push(n.payload.clone());
        }));
        registry.subscribe(Observer::new(EventType::StatusClient, |_| {
            panic!("observer blew up");
        }));
        let d3 = delivered.clone();
        registry.subscribe(Observer::new(EventType::StatusClient, move |n| {
            d3.lock().unwrap().push(n.payload.clone());
        }));

        registry.dispatch(&notification("STATUS_CLIENT", "NOTICE BOOTSTRAP PROGRESS=100"));

        // Both healthy observers received the payload.
        assert_eq!(delivered.lock().unwrap().len(), 2);
        // The failure appears exactly once in the aggregated channel.
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].primary.contains("observer blew up"));
        assert!(seen[0].suppressed.is_empty());
    }

    #[test]
    fn multiple_failures_aggregate_into_one_report() {
        let (handler, seen) = capture_handler();
        let registry = EventRegistry::new(handler);
        registry.subscribe(Observer::new(EventType::Bw, |_| panic!("first failure")));
        registry.subscribe(Observer::new(EventType::Bw, |_| panic!("second failure")));

        registry.dispatch(&notification("BW", "0 0"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].primary.contains("first failure"));
        assert_eq!(seen[0].suppressed.len(), 1);
        assert!(seen[0].suppressed[0].contains("second failure"));
    }

    #[test]
    fn wildcard_observer_sees_everything() {
        let registry = EventRegistry::new(uncaught::ignore());
        let count = Arc::new(Mutex::new(0usize));
        let c = count.clone();
        registry.subscribe(Observer::new(EventKey::All, move |_| {
            *c.lock().unwrap() += 1;
        }));

        registry.dispatch(&notification("BW", "1 2"));
        registry.dispatch(&notification("CIRC", "1 BUILT"));
        // Unknown keywords still reach wildcard observers.
        registry.dispatch(&notification("SOME_FUTURE_EVENT", "x"));
        assert_eq!(*count.lock().unwrap(), 3);
    }

    #[test]
    fn typed_observer_ignores_other_events() {
        let registry = EventRegistry::new(uncaught::ignore());
        let count = Arc::new(Mutex::new(0usize));
        let c = count.clone();
        registry.subscribe(Observer::new(EventType::Circ, move |_| {
            *c.lock().unwrap() += 1;
        }));

        registry.dispatch(&notification("BW", "1 2"));
        assert_eq!(*count.lock().unwrap(), 0);
        registry.dispatch(&notification("CIRC", "1 BUILT"));
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn clear_spares_static_observers() {
        let registry = EventRegistry::new(uncaught::ignore());
        registry.subscribe(Observer::new(EventType::Bw, |_| {}));
        let static_id =
            registry.subscribe(Observer::new(EventKey::All, |_| {}).as_static());
        registry.subscribe(Observer::new(EventType::Circ, |_| {}));

        registry.clear();
        assert_eq!(registry.len(), 1);

        // Targeting the static observer directly still removes it.
        assert!(registry.unsubscribe(static_id));
        assert!(registry.is_empty());
    }

    #[test]
    fn tag_removal_targets_static_observers_too() {
        let registry = EventRegistry::new(uncaught::ignore());
        registry.subscribe(Observer::new(EventType::Bw, |_| {}).tag("metrics"));
        registry.subscribe(
            Observer::new(EventKey::All, |_| {})
                .tag("metrics")
                .as_static(),
        );
        registry.subscribe(Observer::new(EventType::Bw, |_| {}).tag("other"));

        assert_eq!(registry.unsubscribe_tag("metrics"), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn key_removal_spares_static_observers() {
        let registry = EventRegistry::new(uncaught::ignore());
        registry.subscribe(Observer::new(EventType::Bw, |_| {}));
        registry.subscribe(Observer::new(EventType::Bw, |_| {}).as_static());

        assert_eq!(registry.unsubscribe_key(EventType::Bw.into()), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn subscribe_during_dispatch_does_not_affect_current_delivery() {
        let registry = Arc::new(EventRegistry::new(uncaught::ignore()));
        let count = Arc::new(Mutex::new(0usize));

        let reg = registry.clone();
        let c = count.clone();
        registry.subscribe(Observer::new(EventType::Bw, move |_| {
            let c2 = c.clone();
            // Registering from inside a callback must not deadlock or
            // receive the in-progress event.
            reg.subscribe(Observer::new(EventType::Bw, move |_| {
                *c2.lock().unwrap() += 1;
            }));
        }));

        registry.dispatch(&notification("BW", "1 2"));
        assert_eq!(*count.lock().unwrap(), 0);

        registry.dispatch(&notification("BW", "3 4"));
        assert!(*count.lock().unwrap() >= 1);
    }

    #[tokio::test]
    async fn spawned_observer_is_delivered_off_context() {
        let registry = EventRegistry::new(uncaught::ignore());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        registry.subscribe(
            Observer::new(EventType::Bw, move |n| {
                let _ = tx.send(n.payload.clone());
            })
            .exec(ExecPolicy::Spawned),
        );

        registry.dispatch(&notification("BW", "1024 2048"));
        assert_eq!(rx.recv().await.unwrap(), "1024 2048");
    }

    #[tokio::test]
    async fn spawned_observer_panic_reaches_handler() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handler: uncaught::Handler = Arc::new(move |e| {
            let _ = tx.send(e);
        });
        let registry = EventRegistry::new(handler);
        registry.subscribe(
            Observer::new(EventType::Bw, |_| panic!("deferred observer exploded"))
                .exec(ExecPolicy::Spawned),
        );

        registry.dispatch(&notification("BW", "1 2"));

        let failure = rx.recv().await.unwrap();
        assert!(failure.primary.contains("deferred observer exploded"));
        assert!(failure.suppressed.is_empty());
        assert!(failure.context.contains("BW"));
    }
}
