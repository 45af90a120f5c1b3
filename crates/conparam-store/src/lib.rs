// In-memory parameter store keyed by namespace.
// Parameter maps, subscriber lists and the address -> namespace index live
// behind one lock, so the update path resolves and mutates in a single step.
use ahash::RandomState;
use conparam_wire::{NAMESPACE_FIELD, Params, Value};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::net::SocketAddr;

#[derive(Debug, Default)]
struct NamespaceState {
    // Current value per key; last write wins.
    params: Params,
    // Insertion-ordered subscribers. Membership is decided by the index.
    subscribers: Vec<SocketAddr>,
}

#[derive(Debug)]
struct StoreState {
    namespaces: HashMap<String, NamespaceState, RandomState>,
    // Reverse index mirroring `subscribers`: an address belongs to at most one namespace.
    index: HashMap<SocketAddr, String, RandomState>,
}

impl StoreState {
    fn new() -> Self {
        Self {
            namespaces: HashMap::with_hasher(RandomState::new()),
            index: HashMap::with_hasher(RandomState::new()),
        }
    }

    fn namespace_mut(&mut self, namespace: &str) -> &mut NamespaceState {
        self.namespaces.entry_ref(namespace).or_default()
    }

    // Returns true when membership changed.
    fn attach(&mut self, namespace: &str, addr: SocketAddr) -> bool {
        if self
            .index
            .get(&addr)
            .is_some_and(|current| current == namespace)
        {
            self.namespace_mut(namespace);
            return false;
        }
        if let Some(previous) = self.index.insert(addr, namespace.to_string())
            && let Some(state) = self.namespaces.get_mut(previous.as_str())
        {
            state.subscribers.retain(|existing| *existing != addr);
        }
        self.namespace_mut(namespace).subscribers.push(addr);
        true
    }
}

/// Namespace-scoped parameter store shared by all datagram handlers.
///
/// ```
/// use conparam_store::ParameterStore;
/// use conparam_wire::Value;
/// use std::net::SocketAddr;
///
/// let store = ParameterStore::new();
/// let a: SocketAddr = "127.0.0.1:4000".parse().expect("addr");
/// let b: SocketAddr = "127.0.0.1:4001".parse().expect("addr");
/// store.register("roomA", a);
/// store.register("roomA", b);
/// store.set_parameter("roomA", "brightness", Value::from(5), a);
///
/// assert_eq!(store.get_parameter("roomA", "brightness"), Some(Value::from(5)));
/// assert_eq!(store.resolve_namespace(b).as_deref(), Some("roomA"));
/// assert_eq!(store.subscribers("roomA"), vec![a, b]);
/// ```
#[derive(Debug)]
pub struct ParameterStore {
    state: RwLock<StoreState>,
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self {
            state: RwLock::new(StoreState::new()),
        }
    }
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `addr` to `namespace`, moving it out of any namespace it joined before.
    ///
    /// Returns `false` when the address was already a subscriber of `namespace`.
    pub fn register(&self, namespace: &str, addr: SocketAddr) -> bool {
        self.state.write().attach(namespace, addr)
    }

    /// Overwrite `key` in `namespace` and (re)confirm `source` as a subscriber.
    pub fn set_parameter(
        &self,
        namespace: &str,
        key: impl Into<String>,
        value: Value,
        source: SocketAddr,
    ) {
        let mut state = self.state.write();
        state.namespace_mut(namespace).params.insert(key.into(), value);
        state.attach(namespace, source);
    }

    pub fn get_parameter(&self, namespace: &str, key: &str) -> Option<Value> {
        let state = self.state.read();
        state.namespaces.get(namespace)?.params.get(key).cloned()
    }

    /// Owned copy of every parameter in `namespace`; empty when it does not exist.
    pub fn snapshot(&self, namespace: &str) -> Params {
        let state = self.state.read();
        state
            .namespaces
            .get(namespace)
            .map(|ns| ns.params.clone())
            .unwrap_or_default()
    }

    /// Owned copy of the subscriber list so fan-out runs without the lock.
    pub fn subscribers(&self, namespace: &str) -> Vec<SocketAddr> {
        let state = self.state.read();
        state
            .namespaces
            .get(namespace)
            .map(|ns| ns.subscribers.clone())
            .unwrap_or_default()
    }

    pub fn resolve_namespace(&self, addr: SocketAddr) -> Option<String> {
        self.state.read().index.get(&addr).cloned()
    }

    /// Resolve the namespace of `source` and apply `params` to it under one write lock.
    ///
    /// Returns `None`, without touching any state, when `source` never registered.
    pub fn apply_update(&self, source: SocketAddr, params: Params) -> Option<String> {
        let mut state = self.state.write();
        let namespace = state.index.get(&source)?.clone();
        let entry = state.namespace_mut(&namespace);
        for (key, value) in params {
            if key == NAMESPACE_FIELD {
                continue;
            }
            entry.params.insert(key, value);
        }
        Some(namespace)
    }

    pub fn namespace_count(&self) -> usize {
        self.state.read().namespaces.len()
    }
}
