//! Typed, observable variables
//!
//! A [`Variable`] is a named value bound to one address. Its current value
//! lives in a `watch` channel: observers always see the latest value, a new
//! subscriber immediately sees it too, and a value is only published when it
//! differs from the previous one.
//!
//! Variables with [`Priority::Disabled`] have no address. They are derived
//! from other variables and recomputed whenever one of their inputs changes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

use crate::access::MemoryAccess;
use crate::address::Address;
use crate::priority::Priority;
use crate::store::VariableEntry;
use crate::value::{Value, ValueKind, VariableType};

/// Change hook; returning `false` unregisters it
type Dependent<R> = Arc<dyn Fn(&Option<R>) -> bool + Send + Sync>;

struct Inner<A, R> {
    name: String,
    unit: Option<String>,
    address: Option<A>,
    priority: Priority,
    read_only: bool,
    value: watch::Sender<Option<R>>,
    dependents: Mutex<Vec<Dependent<R>>>,
}

impl<A, R: Clone + PartialEq> Inner<A, R> {
    fn publish(&self, value: R) -> bool {
        let changed = self.value.send_if_modified(move |current| {
            if current.as_ref() == Some(&value) {
                false
            } else {
                *current = Some(value);
                true
            }
        });
        if changed {
            let snapshot = self.value.borrow().clone();
            // Hooks run unlocked so they may register further hooks
            let hooks = self.dependents.lock().clone();
            let finished: Vec<Dependent<R>> = hooks
                .into_iter()
                .filter(|hook| !hook(&snapshot))
                .collect();
            if !finished.is_empty() {
                self.dependents
                    .lock()
                    .retain(|hook| !finished.iter().any(|done| Arc::ptr_eq(done, hook)));
            }
        }
        changed
    }
}

/// A named, typed, observable value bound to one address.
///
/// `R` is the type read back from the machine, `W` the type written to it.
/// Cloning a variable yields another handle to the same value.
pub struct Variable<A, R, W = R> {
    inner: Arc<Inner<A, R>>,
    _write: PhantomData<fn(W)>,
}

impl<A, R, W> Clone for Variable<A, R, W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _write: PhantomData,
        }
    }
}

impl<A: std::fmt::Debug, R: std::fmt::Debug, W> std::fmt::Debug for Variable<A, R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.inner.name)
            .field("address", &self.inner.address)
            .field("priority", &self.inner.priority)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

/// Builder for variables that need a unit or are read-only
pub struct VariableBuilder<A, R, W> {
    name: String,
    address: A,
    priority: Priority,
    unit: Option<String>,
    read_only: bool,
    _types: PhantomData<fn(R, W)>,
}

impl<A: Address, R: VariableType, W: VariableType> VariableBuilder<A, R, W> {
    /// Poll priority (defaults to medium)
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Unit or alias used for lookups
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Reject writes
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Finish the variable
    pub fn build(self) -> Variable<A, R, W> {
        Variable::from_parts(
            self.name,
            self.unit,
            Some(self.address),
            self.priority,
            self.read_only,
        )
    }
}

impl<A, R, W> Variable<A, R, W>
where
    A: Address,
    R: VariableType,
    W: VariableType,
{
    fn from_parts(
        name: String,
        unit: Option<String>,
        address: Option<A>,
        priority: Priority,
        read_only: bool,
    ) -> Self {
        let (value, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                name,
                unit,
                address,
                priority,
                read_only,
                value,
                dependents: Mutex::new(Vec::new()),
            }),
            _write: PhantomData,
        }
    }

    /// A polled, writable variable
    pub fn new(name: impl Into<String>, address: A, priority: Priority) -> Self {
        Self::from_parts(name.into(), None, Some(address), priority, false)
    }

    /// Start building a variable with extra options
    pub fn builder(name: impl Into<String>, address: A) -> VariableBuilder<A, R, W> {
        VariableBuilder {
            name: name.into(),
            address,
            priority: Priority::Medium,
            unit: None,
            read_only: false,
            _types: PhantomData,
        }
    }

    /// A computed variable whose value is derived from `inputs`.
    ///
    /// `compute` runs once immediately and again every time any input
    /// publishes a new value; returning `None` leaves the value unchanged.
    /// The result is published as one atomic update.
    pub fn derived<S, T, F>(name: impl Into<String>, inputs: &[&Variable<A, S, T>], compute: F) -> Self
    where
        S: VariableType,
        T: VariableType,
        F: Fn(&[Option<S>]) -> Option<R> + Send + Sync + 'static,
    {
        let variable = Self::from_parts(name.into(), None, None, Priority::Disabled, true);

        let target = Arc::downgrade(&variable.inner);
        let sources: Vec<Weak<Inner<A, S>>> =
            inputs.iter().map(|v| Arc::downgrade(&v.inner)).collect();
        // Held from reading the inputs until the result is published
        let serial = Mutex::new(());
        let recompute = Arc::new(move || -> bool {
            let Some(target) = target.upgrade() else {
                return false;
            };
            let _serial = serial.lock();
            let values: Vec<Option<S>> = sources
                .iter()
                .map(|source| source.upgrade().and_then(|s| s.value.borrow().clone()))
                .collect();
            if let Some(result) = compute(&values) {
                target.publish(result);
            }
            true
        });

        for input in inputs {
            let recompute = recompute.clone();
            input
                .inner
                .dependents
                .lock()
                .push(Arc::new(move |_| recompute()));
        }
        recompute();

        variable
    }

    /// Variable name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Unit or alias, if any
    pub fn unit(&self) -> Option<&str> {
        self.inner.unit.as_deref()
    }

    /// Bound address; `None` for computed variables
    pub fn address(&self) -> Option<&A> {
        self.inner.address.as_ref()
    }

    /// Poll priority
    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    /// Whether writes are rejected
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Whether this variable is derived rather than polled
    pub fn is_computed(&self) -> bool {
        self.inner.priority == Priority::Disabled
    }

    /// Last known value; `None` until the first successful read
    pub fn current(&self) -> Option<R> {
        self.inner.value.borrow().clone()
    }

    /// Replay-latest stream of the cached value
    pub fn subscribe(&self) -> watch::Receiver<Option<R>> {
        self.inner.value.subscribe()
    }

    /// Register a hook run after every published change.
    ///
    /// The hook is dropped once it returns `false`.
    pub fn on_change<F>(&self, hook: F)
    where
        F: Fn(&Option<R>) -> bool + Send + Sync + 'static,
    {
        self.inner.dependents.lock().push(Arc::new(hook));
    }

    /// Store a freshly read value. Returns whether observers were notified.
    pub fn publish(&self, value: R) -> bool {
        self.inner.publish(value)
    }

    /// Read from the machine and publish the result.
    ///
    /// Computed variables never touch the transport and return their
    /// current value. A value that does not fit `R` reads as absent.
    pub async fn read(&self, access: &dyn MemoryAccess<A>) -> Option<R> {
        let Some(address) = self.inner.address.as_ref() else {
            return self.current();
        };

        let raw = access.read(address, R::KIND).await?;
        match R::from_value(&raw) {
            Some(value) => {
                self.publish(value.clone());
                Some(value)
            }
            None => {
                tracing::warn!(
                    variable = %self.inner.name,
                    address = %address,
                    "Value {} does not fit {}",
                    raw,
                    R::KIND
                );
                None
            }
        }
    }

    /// Write to the machine without touching the cached value.
    ///
    /// The change becomes observable on the next successful poll.
    pub async fn send(&self, access: &dyn MemoryAccess<A>, value: W) -> bool {
        let Some(address) = self.inner.address.as_ref() else {
            tracing::warn!(variable = %self.inner.name, "Write to computed variable rejected");
            return false;
        };
        if self.inner.read_only {
            tracing::warn!(variable = %self.inner.name, "Write to read-only variable rejected");
            return false;
        }
        access.write(address, value.into_value()).await
    }

    /// Write to the machine and, on success, publish the written value
    /// when it is representable as `R`.
    pub async fn write(&self, access: &dyn MemoryAccess<A>, value: W) -> bool {
        let raw = value.clone().into_value();
        if !self.send(access, value).await {
            return false;
        }
        if let Some(read_back) = R::from_value(&raw) {
            self.publish(read_back);
        }
        true
    }
}

#[async_trait]
impl<A, R, W> VariableEntry<A> for Variable<A, R, W>
where
    A: Address,
    R: VariableType,
    W: VariableType,
{
    fn name(&self) -> &str {
        Variable::name(self)
    }

    fn unit(&self) -> Option<&str> {
        Variable::unit(self)
    }

    fn address(&self) -> Option<&A> {
        Variable::address(self)
    }

    fn priority(&self) -> Priority {
        Variable::priority(self)
    }

    fn kind(&self) -> ValueKind {
        R::KIND
    }

    fn write_kind(&self) -> ValueKind {
        W::KIND
    }

    fn is_read_only(&self) -> bool {
        Variable::is_read_only(self) || self.is_computed()
    }

    fn current_value(&self) -> Option<Value> {
        self.current().map(VariableType::into_value)
    }

    fn observe_value(&self) -> watch::Receiver<Option<Value>> {
        let (tx, rx) = watch::channel(self.current_value());
        self.on_change(move |value| {
            let converted = value.clone().map(VariableType::into_value);
            tx.send_if_modified(|current| {
                if *current == converted {
                    false
                } else {
                    *current = converted;
                    true
                }
            });
            !tx.is_closed()
        });
        rx
    }

    async fn poll(&self, access: &dyn MemoryAccess<A>) -> bool {
        self.read(access).await.is_some()
    }

    async fn read_value(&self, access: &dyn MemoryAccess<A>) -> Option<Value> {
        self.read(access).await.map(VariableType::into_value)
    }

    async fn send_value(&self, access: &dyn MemoryAccess<A>, value: Value) -> bool {
        match W::from_value(&value) {
            Some(typed) => self.send(access, typed).await,
            None => {
                tracing::warn!(
                    variable = %self.name(),
                    "Value {} does not fit {}",
                    value,
                    W::KIND
                );
                false
            }
        }
    }
}
