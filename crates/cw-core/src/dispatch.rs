//! Event Dispatcher
//!
//! A named event whose listeners live as long as their owning [`Context`].
//! Adding a listener hands a [`FireHandle`] to the event's register function,
//! which wires it into whatever produces the events and returns the function
//! that undoes that wiring.
//!
//! Every fire re-checks that the context is loaded and active and that the
//! listener is still registered, so a listener removed while an event is in
//! flight is never called for it.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::task::JoinHandle;

/// Failure while undoing a listener's wiring.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to unregister listener: {0}")]
pub struct UnregisterError(pub String);

/// A raw fire was attempted for a listener that may not run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Called raw() on unloaded/inactive context for '{event}'")]
pub struct LivenessViolation {
    pub event: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Context
// =============================================================================

/// Something to run when its owning context is unloaded.
pub trait CloseHook: Send + Sync {
    fn close(&self);
}

/// Owner of event listeners (an extension page, a test, a tool run).
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    active: AtomicBool,
    unloaded: AtomicBool,
    on_close: Mutex<HashMap<u64, Weak<dyn CloseHook>>>,
}

impl Context {
    /// Create an active, loaded context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                active: AtomicBool::new(true),
                unloaded: AtomicBool::new(false),
                on_close: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::Release);
    }

    pub fn is_unloaded(&self) -> bool {
        self.inner.unloaded.load(Ordering::Acquire)
    }

    /// Mark the context unloaded and run every close hook once.
    pub fn unload(&self) {
        if self.inner.unloaded.swap(true, Ordering::AcqRel) {
            return;
        }

        let hooks: Vec<Weak<dyn CloseHook>> = lock(&self.inner.on_close).drain().map(|(_, hook)| hook).collect();
        log::debug!("Context unloaded, running {} close hooks", hooks.len());
        for hook in hooks {
            if let Some(hook) = hook.upgrade() {
                hook.close();
            }
        }
    }

    /// Register `hook` under `key`; re-registering the same key is a no-op.
    pub fn call_on_close(&self, key: u64, hook: Weak<dyn CloseHook>) {
        lock(&self.inner.on_close).entry(key).or_insert(hook);
    }

    pub fn forget_on_close(&self, key: u64) {
        lock(&self.inner.on_close).remove(&key);
    }

    pub fn close_hook_count(&self) -> usize {
        lock(&self.inner.on_close).len()
    }

    /// Run a listener, turning a panic into a logged error and `None`.
    pub fn run_safe<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => Some(result),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("Listener panicked: {message}");
                None
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("active", &self.is_active())
            .field("unloaded", &self.is_unloaded())
            .field("close_hooks", &self.close_hook_count())
            .finish()
    }
}

// =============================================================================
// Listener Types
// =============================================================================

/// A listener callback. Identity is the `Arc` allocation.
pub type Listener<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

/// Undoes the wiring done by a register function.
pub type Unregister = Box<dyn FnOnce() -> Result<(), UnregisterError> + Send>;

/// Wires a fire handle into an event producer.
pub type RegisterFn<A, R, P> = dyn Fn(FireHandle<A, R>, P) -> Unregister + Send + Sync;

/// Token returned by [`EventDispatcher::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    dispatcher: u64,
    id: u64,
}

static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

struct ListenerEntry {
    callback_key: usize,
    unregister: Unregister,
}

type ListenerTable = Mutex<HashMap<u64, ListenerEntry>>;

fn callback_key<A, R>(callback: &Listener<A, R>) -> usize {
    Arc::as_ptr(callback) as *const () as usize
}

// =============================================================================
// Fire Handle
// =============================================================================

/// Invokes one registered listener.
pub struct FireHandle<A, R> {
    event: Arc<str>,
    context: Context,
    listeners: Weak<ListenerTable>,
    id: u64,
    callback: Listener<A, R>,
}

impl<A, R> Clone for FireHandle<A, R> {
    fn clone(&self) -> Self {
        Self {
            event: Arc::clone(&self.event),
            context: self.context.clone(),
            listeners: Weak::clone(&self.listeners),
            id: self.id,
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<A, R> FireHandle<A, R> {
    /// Whether the listener may run right now.
    pub fn should_fire(&self) -> bool {
        if self.context.is_unloaded() {
            log::debug!("{} event fired after context unloaded", self.event);
            false
        } else if !self.context.is_active() {
            log::debug!("{} event fired while context is inactive", self.event);
            false
        } else {
            match self.listeners.upgrade() {
                Some(table) => {
                    let registered = lock(&table).contains_key(&self.id);
                    registered
                }
                None => false,
            }
        }
    }

    /// Call the listener now and return its result.
    ///
    /// Returns `None` when the listener may not run or panicked.
    pub fn fire_sync(&self, args: A) -> Option<R> {
        if !self.should_fire() {
            return None;
        }
        let callback = &self.callback;
        self.context.run_safe(|| callback(args))
    }

    /// Call the listener now; the caller has already checked liveness.
    pub fn fire_raw(&self, args: A) -> Result<R, LivenessViolation> {
        if !self.should_fire() {
            return Err(LivenessViolation {
                event: self.event.to_string(),
            });
        }
        Ok((self.callback)(args))
    }
}

impl<A, R> FireHandle<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Call the listener on a later scheduler turn with a copy of `args`.
    ///
    /// Liveness is checked when the task runs, not when it is queued.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn fire_async(&self, args: &A) -> JoinHandle<Option<R>>
    where
        A: Clone,
    {
        self.fire_async_without_clone(args.clone())
    }

    /// Like [`fire_async`](Self::fire_async) but moves `args` into the task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn fire_async_without_clone(&self, args: A) -> JoinHandle<Option<R>> {
        let fire = self.clone();
        tokio::spawn(async move { fire.fire_sync(args) })
    }
}

// =============================================================================
// Event Dispatcher
// =============================================================================

struct DispatcherInner<A, R, P> {
    id: u64,
    name: Arc<str>,
    context: Context,
    register: Box<RegisterFn<A, R, P>>,
    listeners: Arc<ListenerTable>,
    next_listener: AtomicU64,
}

impl<A, R, P> DispatcherInner<A, R, P> {
    fn find(&self, key: usize) -> Option<u64> {
        lock(&self.listeners)
            .iter()
            .find(|(_, entry)| entry.callback_key == key)
            .map(|(id, _)| *id)
    }

    fn handle(&self, id: u64) -> ListenerHandle {
        ListenerHandle {
            dispatcher: self.id,
            id,
        }
    }

    fn remove(&self, id: u64) {
        let entry = lock(&self.listeners).remove(&id);
        let Some(entry) = entry else {
            return;
        };

        if let Err(e) = (entry.unregister)() {
            log::error!("{}: {e}", self.name);
        }

        if lock(&self.listeners).is_empty() {
            self.context.forget_on_close(self.id);
        }
    }

    fn revoke(&self) {
        let ids: Vec<u64> = lock(&self.listeners).keys().copied().collect();
        for id in ids {
            self.remove(id);
        }
    }
}

impl<A, R, P> CloseHook for DispatcherInner<A, R, P> {
    fn close(&self) {
        self.revoke();
    }
}

/// A named event with per-listener lifecycle.
pub struct EventDispatcher<A, R, P> {
    inner: Arc<DispatcherInner<A, R, P>>,
}

impl<A, R, P> Clone for EventDispatcher<A, R, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R, P> fmt::Debug for EventDispatcher<A, R, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("name", &self.inner.name)
            .field("listeners", &lock(&self.inner.listeners).len())
            .finish()
    }
}

impl<A, R, P> EventDispatcher<A, R, P>
where
    A: 'static,
    R: 'static,
    P: 'static,
{
    pub fn new(
        context: Context,
        name: impl Into<String>,
        register: impl Fn(FireHandle<A, R>, P) -> Unregister + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                id: NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed),
                name: Arc::from(name.into()),
                context,
                register: Box::new(register),
                listeners: Arc::new(Mutex::new(HashMap::new())),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Register `callback`. Adding an already registered callback returns its
    /// existing handle without calling the register function again.
    pub fn add_listener(&self, callback: Listener<A, R>, params: P) -> ListenerHandle {
        let inner = &self.inner;
        let key = callback_key(&callback);
        if let Some(id) = inner.find(key) {
            return inner.handle(id);
        }

        let id = inner.next_listener.fetch_add(1, Ordering::Relaxed);
        // No close hook would ever run, so nothing may be wired up.
        if inner.context.is_unloaded() {
            log::warn!("{}.addListener called after context unloaded", inner.name);
            return inner.handle(id);
        }

        let fire = FireHandle {
            event: Arc::clone(&inner.name),
            context: inner.context.clone(),
            listeners: Arc::downgrade(&inner.listeners),
            id,
            callback,
        };
        let unregister = (inner.register)(fire, params);

        {
            let mut table = lock(&inner.listeners);
            let raced = table
                .iter()
                .find(|(_, entry)| entry.callback_key == key)
                .map(|(id, _)| *id);
            if let Some(existing) = raced {
                drop(table);
                if let Err(e) = unregister() {
                    log::error!("{}: {e}", inner.name);
                }
                return inner.handle(existing);
            }
            table.insert(
                id,
                ListenerEntry {
                    callback_key: key,
                    unregister,
                },
            );
        }

        let hook: Weak<dyn CloseHook> = Arc::downgrade(&self.inner) as Weak<dyn CloseHook>;
        inner.context.call_on_close(inner.id, hook);
        if inner.context.is_unloaded() {
            // Unloaded while registering; the hooks have already run.
            inner.remove(id);
        }
        inner.handle(id)
    }

    /// Remove a listener. Unknown handles are ignored.
    pub fn remove_listener(&self, handle: ListenerHandle) {
        if handle.dispatcher == self.inner.id {
            self.inner.remove(handle.id);
        }
    }

    pub fn has_listener(&self, handle: ListenerHandle) -> bool {
        handle.dispatcher == self.inner.id && lock(&self.inner.listeners).contains_key(&handle.id)
    }

    /// Handle for `callback` if it is registered here.
    pub fn handle_for(&self, callback: &Listener<A, R>) -> Option<ListenerHandle> {
        self.inner
            .find(callback_key(callback))
            .map(|id| self.inner.handle(id))
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Remove every listener.
    pub fn revoke(&self) {
        self.inner.revoke();
    }
}
