//! Listener registration primitives shared by the table and view engines.
//!
//! A subscription goes through three phases:
//!
//! 1. the user's config closure fills in a mutable [`ListenerConfig`];
//! 2. the metadata is sealed into the shared handle (reading it earlier
//!    yields [`GridError::InvalidListener`]);
//! 3. the record is inserted into its registry map under a fresh
//!    [`ListenerKey`] and flipped from `Pending` to `Active`.
//!
//! `unsubscribe()` may race any of these phases: the lifecycle is an atomic
//! three-state machine {Pending, Active, Removed}, and an unsubscribe that
//! lands before activation simply wins — the record is discarded and no
//! history is replayed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use gridpulse_common::GridError;
use parking_lot::{Mutex, RwLock};

/// Dispatch key: primary sort on the user-chosen `order`, ties broken by a
/// globally unique monotonic insertion id (first registered wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerKey {
    pub order: i64,
    pub id: u64,
}

static INSERTION_IDS: AtomicU64 = AtomicU64::new(0);

impl ListenerKey {
    pub(crate) fn next(order: i64) -> Self {
        ListenerKey {
            order,
            id: INSERTION_IDS.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// Immutable listener metadata, sealed once the config closure returns.
#[derive(Debug, Clone)]
pub(crate) struct ListenerMeta {
    pub name: Option<String>,
    pub order: i64,
    pub allow_loop: bool,
}

impl Default for ListenerMeta {
    fn default() -> Self {
        ListenerMeta {
            name: None,
            order: 0,
            allow_loop: false,
        }
    }
}

const PENDING: u8 = 0;
const ACTIVE: u8 = 1;
const REMOVED: u8 = 2;

type Remover = Box<dyn Fn(ListenerKey) + Send + Sync>;

/// State shared between a [`ListenerRef`] and the registry entry.
pub(crate) struct ListenerShared {
    state: AtomicU8,
    key: OnceLock<ListenerKey>,
    meta: OnceLock<ListenerMeta>,
    remove: OnceLock<Remover>,
}

impl ListenerShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(ListenerShared {
            state: AtomicU8::new(PENDING),
            key: OnceLock::new(),
            meta: OnceLock::new(),
            remove: OnceLock::new(),
        })
    }

    pub(crate) fn seal_meta(&self, meta: ListenerMeta) {
        let _ = self.meta.set(meta);
    }

    pub(crate) fn set_key(&self, key: ListenerKey) {
        let _ = self.key.set(key);
    }

    pub(crate) fn set_remover(&self, remover: Remover) {
        let _ = self.remove.set(remover);
    }

    /// Pending -> Active. Returns false if an unsubscribe got there first,
    /// in which case the caller must discard the inserted record.
    pub(crate) fn activate(&self) -> bool {
        self.state
            .compare_exchange(PENDING, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    fn unsubscribe(&self) {
        let prev = self.state.swap(REMOVED, Ordering::AcqRel);
        if prev == ACTIVE {
            if let (Some(key), Some(remove)) = (self.key.get(), self.remove.get()) {
                remove(*key);
            }
        }
        // Pending: the registration in flight observes Removed when it
        // tries to activate and cleans up after itself.
    }
}

/// Handle returned from every subscribe call.
///
/// Cheap to clone; `unsubscribe` is idempotent and safe to call at any
/// point, including from inside the config closure before registration
/// has completed.
#[derive(Clone)]
pub struct ListenerRef {
    shared: Arc<ListenerShared>,
}

impl ListenerRef {
    pub(crate) fn new(shared: Arc<ListenerShared>) -> Self {
        ListenerRef { shared }
    }

    pub fn unsubscribe(&self) {
        self.shared.unsubscribe();
    }

    pub fn name(&self) -> Result<Option<String>, GridError> {
        self.meta().map(|m| m.name.clone())
    }

    pub fn order(&self) -> Result<i64, GridError> {
        self.meta().map(|m| m.order)
    }

    pub fn allow_loop(&self) -> Result<bool, GridError> {
        self.meta().map(|m| m.allow_loop)
    }

    fn meta(&self) -> Result<&ListenerMeta, GridError> {
        self.shared.meta.get().ok_or(GridError::InvalidListener)
    }
}

impl std::fmt::Debug for ListenerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRef")
            .field("key", &self.shared.key.get())
            .finish()
    }
}

pub(crate) type EventCallback<E> = Box<dyn FnMut(&[E]) + Send>;

/// Mutable builder handed to the user's config closure.
pub struct ListenerConfig<E> {
    pub(crate) shared: Arc<ListenerShared>,
    pub(crate) meta: ListenerMeta,
    pub(crate) skip_history: bool,
    pub(crate) callback: Option<EventCallback<E>>,
}

impl<E> ListenerConfig<E> {
    pub(crate) fn new(shared: Arc<ListenerShared>) -> Self {
        ListenerConfig {
            shared,
            meta: ListenerMeta::default(),
            skip_history: false,
            callback: None,
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.meta.name = Some(name.into());
        self
    }

    /// Dispatch order; lower runs first. Defaults to 0.
    pub fn order(&mut self, order: i64) -> &mut Self {
        self.meta.order = order;
        self
    }

    /// Permits the listener to re-trigger itself within one dispatch pass.
    pub fn allow_loop(&mut self, allow: bool) -> &mut Self {
        self.meta.allow_loop = allow;
        self
    }

    /// Suppresses the one-time replay of pre-existing state on subscribe.
    pub fn skip_history(&mut self, skip: bool) -> &mut Self {
        self.skip_history = skip;
        self
    }

    pub fn events<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(&[E]) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// The listener's own reference, usable before registration completes
    /// (metadata accessors fail with `InvalidListener` until then).
    pub fn reference(&self) -> ListenerRef {
        ListenerRef::new(Arc::clone(&self.shared))
    }
}

/// One registered listener. `callback` is behind a mutex so two threads
/// dispatching to the same listener are serialized.
pub(crate) struct ListenerEntry<E, S> {
    pub key: ListenerKey,
    pub shared: Arc<ListenerShared>,
    pub scope: S,
    pub allow_loop: bool,
    pub watermark: u64,
    pub label: String,
    pub callback: Mutex<EventCallback<E>>,
}

impl<E, S> ListenerEntry<E, S> {
    pub(crate) fn deliver(&self, events: &[E]) {
        (self.callback.lock())(events);
    }
}

pub(crate) type ListenerMap<E, S> =
    Arc<RwLock<BTreeMap<ListenerKey, Arc<ListenerEntry<E, S>>>>>;

pub(crate) fn new_listener_map<E, S>() -> ListenerMap<E, S> {
    Arc::new(RwLock::new(BTreeMap::new()))
}

/// Label used in loop errors: the user-facing name when present, the key
/// otherwise.
pub(crate) fn listener_label(meta: &ListenerMeta, key: ListenerKey) -> String {
    match &meta.name {
        Some(name) => name.clone(),
        None => format!("listener {}/{}", key.order, key.id),
    }
}

/// Registers a configured listener into `map`. Returns the entry when the
/// listener survived registration (i.e. was not unsubscribed from inside
/// the config closure), in which case history replay may proceed.
#[allow(clippy::type_complexity)]
pub(crate) fn register<E, S>(
    map: &ListenerMap<E, S>,
    shared: Arc<ListenerShared>,
    meta: ListenerMeta,
    scope: S,
    watermark: u64,
    callback: Option<EventCallback<E>>,
) -> (ListenerRef, Option<Arc<ListenerEntry<E, S>>>)
where
    E: 'static,
    S: Send + Sync + 'static,
{
    let key = ListenerKey::next(meta.order);
    let label = listener_label(&meta, key);
    let allow_loop = meta.allow_loop;
    shared.seal_meta(meta);

    let entry = Arc::new(ListenerEntry {
        key,
        shared: Arc::clone(&shared),
        scope,
        allow_loop,
        watermark,
        label,
        callback: Mutex::new(callback.unwrap_or_else(|| Box::new(|_: &[E]| {}))),
    });

    map.write().insert(key, Arc::clone(&entry));
    shared.set_remover({
        let map = Arc::clone(map);
        Box::new(move |k| {
            map.write().remove(&k);
        })
    });
    shared.set_key(key);

    if shared.activate() {
        (ListenerRef::new(shared), Some(entry))
    } else {
        // Unsubscribed before activation; drop the record again.
        map.write().remove(&key);
        (ListenerRef::new(shared), None)
    }
}
