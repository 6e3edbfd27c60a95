use crate::base::INullableValue;
use std::{
    any::Any,
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    rc::Rc,
};

/// A region of simulated state, e.g. "texture 7's sampler params".
///
/// Keys come from many APIs with heterogeneous payloads; the core only
/// requires the parent link, equality and hashing. `parent()` returns the
/// enclosing region (this key is a strict subset of it); `None` means the
/// key is top-level.
pub trait IStateKey: fmt::Debug + 'static {
    fn parent(&self) -> Option<StateKey>;

    /// 动态分发的相等比较. 实现者先用 `as_any` 向下转型, 类型不同一律不等.
    fn eq_dyn(&self, other: &dyn IStateKey) -> bool;

    /// 动态分发的哈希. 必须与 `eq_dyn` 一致, 否则地址映射会把同一个
    /// 状态区域当成两个.
    fn hash_dyn(&self, hasher: &mut dyn Hasher);

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a state key. Equality and hashing delegate to the
/// underlying key, so handles to equal keys are interchangeable.
#[derive(Clone)]
pub struct StateKey {
    inner: Rc<dyn IStateKey>,
}

impl StateKey {
    pub fn new(key: impl IStateKey) -> Self {
        Self { inner: Rc::new(key) }
    }

    pub fn parent(&self) -> Option<StateKey> {
        self.inner.parent()
    }

    pub fn downcast_ref<T: IStateKey>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref()
    }
}

impl PartialEq for StateKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.eq_dyn(other.inner.as_ref())
    }
}
impl Eq for StateKey {}

impl Hash for StateKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash_dyn(state)
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

/// Dense integer handle for a state key within one dependency graph.
/// Address 0 stands for the null key, the common ancestor of everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateAddress(u32);

impl StateAddress {
    pub const NULL: Self = Self(0);

    pub fn from_handle(handle: u32) -> Self {
        Self(handle)
    }
    pub fn into_handle(self) -> u32 {
        self.0
    }
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl INullableValue for StateAddress {
    fn new_null() -> Self {
        Self::NULL
    }
    fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Interns state keys into dense addresses and records the parent forest.
///
/// Append-only while the graph is being built, frozen afterwards. The
/// parent of every interned key is interned along with it, so addresses
/// form a forest rooted at `StateAddress::NULL`.
#[derive(Debug, Default)]
pub struct StateAddressMap {
    address: HashMap<StateKey, StateAddress>,
    keys: Vec<Option<StateKey>>,
    parents: Vec<StateAddress>,
}

impl StateAddressMap {
    pub fn new() -> Self {
        // 0 号槽位留给空键, 它是自己的父节点.
        Self {
            address: HashMap::new(),
            keys: vec![None],
            parents: vec![StateAddress::NULL],
        }
    }

    /// Number of allocated addresses, the null sentinel included.
    pub fn len(&self) -> usize {
        self.keys.len()
    }
    pub fn is_empty(&self) -> bool {
        self.keys.len() <= 1
    }

    /// Intern `key`, allocating the next sequential address on first
    /// sight. Idempotent.
    ///
    /// The child's slot is reserved before its parent chain is interned,
    /// so a key whose `parent()` lazily constructs new keys must not
    /// re-enter `intern` for the key itself during a single call. A
    /// parent chain that loops back on itself panics instead of hanging.
    pub fn intern(&mut self, key: &StateKey) -> StateAddress {
        let addr = self.intern_inner(key);
        self.check_acyclic(addr);
        addr
    }

    fn intern_inner(&mut self, key: &StateKey) -> StateAddress {
        if let Some(&addr) = self.address.get(key) {
            return addr;
        }
        let addr = StateAddress::from_handle(self.keys.len() as u32);
        self.address.insert(key.clone(), addr);
        self.keys.push(Some(key.clone()));
        self.parents.push(StateAddress::NULL);
        let parent = match key.parent() {
            Some(parent) => self.intern_inner(&parent),
            None => StateAddress::NULL,
        };
        self.parents[addr.index()] = parent;
        addr
    }

    fn check_acyclic(&self, addr: StateAddress) {
        let mut cursor = addr;
        let mut steps = 0usize;
        while cursor.is_nonnull() {
            cursor = self.parent_of(cursor);
            steps += 1;
            if steps > self.len() {
                panic!("parent chain of state key {:?} forms a cycle", self.key_of(addr));
            }
        }
    }

    /// Address of an already-interned key.
    pub fn lookup(&self, key: &StateKey) -> Option<StateAddress> {
        self.address.get(key).copied()
    }

    /// The key behind `addr`; `None` for the null address.
    pub fn key_of(&self, addr: StateAddress) -> Option<&StateKey> {
        self.keys[addr.index()].as_ref()
    }

    /// Parent address; `parent_of(NULL) == NULL`.
    pub fn parent_of(&self, addr: StateAddress) -> StateAddress {
        self.parents[addr.index()]
    }
}
