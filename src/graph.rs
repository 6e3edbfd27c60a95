//! Dependency graph over a capture: one behaviour per command recording
//! which state regions the command reads, modifies and writes.

mod address;
mod builder;

pub use {
    address::{IStateKey, StateAddress, StateAddressMap, StateKey},
    builder::{BuildError, BuildRes, GraphBuilder, GraphCache},
};

use crate::capture::{ApiId, CmdId, ICommand, ReplayState};
use smallvec::SmallVec;
use std::{collections::{BTreeSet, HashMap}, fmt, rc::Rc};

/// Footprint lists are short for almost every command; eight inline slots
/// cover the common case without touching the heap.
pub type AddressList = SmallVec<[StateAddress; 8]>;

/// Per-command footprint: the edges of the dependency graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdBehaviour {
    /// State regions read by the command.
    pub reads: AddressList,
    /// State regions read and written, e.g. a blend toggle.
    pub modifies: AddressList,
    /// State regions wholly overwritten.
    pub writes: AddressList,
    /// State regions that become live whenever some command is requested.
    pub roots: AddressList,
    /// Force the command to stay live.
    pub keep_alive: bool,
    /// The simulated mutation failed; the command has no effect.
    pub aborted: bool,
}

impl CmdBehaviour {
    pub fn read(&mut self, builder: &mut GraphBuilder, key: Option<&StateKey>) {
        if let Some(key) = key {
            self.reads.push(builder.intern(key));
        }
    }

    pub fn modify(&mut self, builder: &mut GraphBuilder, key: Option<&StateKey>) {
        if let Some(key) = key {
            self.modifies.push(builder.intern(key));
        }
    }

    /// Record a complete overwrite of `key`'s region. A provider that
    /// cannot guarantee the overwrite covers the whole region must call
    /// `modify` instead, otherwise earlier writers of the region are
    /// dropped even though parts of their output survive.
    pub fn write(&mut self, builder: &mut GraphBuilder, key: Option<&StateKey>) {
        if let Some(key) = key {
            self.writes.push(builder.intern(key));
        }
    }

    pub fn set_root(&mut self, builder: &mut GraphBuilder, key: Option<&StateKey>) {
        if let Some(key) = key {
            self.roots.push(builder.intern(key));
        }
    }
}

/// Per-API footprint recorder.
///
/// `behaviour_for` must mutate `state` in place so that it reflects the
/// command's effects exactly once, recording every touched state region
/// into the returned behaviour on the way. Providers must not retain
/// references to the returned behaviour.
pub trait IBehaviourProvider {
    fn behaviour_for(
        &mut self,
        state: &mut ReplayState,
        id: CmdId,
        builder: &mut GraphBuilder,
        cmd: &dyn ICommand,
    ) -> CmdBehaviour;
}

/// A graphics API known to the replay core.
pub trait IApi {
    fn id(&self) -> ApiId;
    fn name(&self) -> &str;

    /// A fresh provider for one graph build, or `None` when the API does
    /// not contribute footprints. Commands of such APIs are kept alive
    /// unconditionally.
    fn new_behaviour_provider(&self) -> Option<Box<dyn IBehaviourProvider>>;
}

/// Registry of the APIs appearing in a capture, keyed by tag.
#[derive(Default)]
pub struct ApiRegistry {
    apis: HashMap<ApiId, Rc<dyn IApi>>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, api: Rc<dyn IApi>) -> &mut Self {
        let id = api.id();
        if self.apis.insert(id, api).is_some() {
            panic!("API {id:?} registered twice");
        }
        self
    }

    pub fn get(&self, id: ApiId) -> Option<&Rc<dyn IApi>> {
        self.apis.get(&id)
    }
}

/// The immutable result of one graph build.
///
/// Built once per capture and cached by capture identity; the liveness
/// sweep consumes it many times with different request sets.
pub struct DependencyGraph {
    /// Command list this graph was built for, in capture order.
    pub commands: Box<[Rc<dyn ICommand>]>,
    /// One behaviour per command, indexed by command id.
    pub behaviours: Box<[CmdBehaviour]>,
    /// Union of every behaviour's roots.
    pub roots: BTreeSet<StateAddress>,
    addresses: StateAddressMap,
}

impl DependencyGraph {
    pub fn len(&self) -> usize {
        self.commands.len()
    }
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn addresses(&self) -> &StateAddressMap {
        &self.addresses
    }

    /// Address of `key` if any command touched it during the build.
    pub fn address_of(&self, key: &StateKey) -> Option<StateAddress> {
        self.addresses.lookup(key)
    }

    /// Dump one command's footprint at debug level, keys resolved.
    pub fn dump_behaviour(&self, id: CmdId) {
        let b = &self.behaviours[id.index()];
        for &read in &b.reads {
            log::debug!(" - read [{}] {:?}", read.into_handle(), self.addresses.key_of(read));
        }
        for &modify in &b.modifies {
            log::debug!(" - modify [{}] {:?}", modify.into_handle(), self.addresses.key_of(modify));
        }
        for &write in &b.writes {
            log::debug!(" - write [{}] {:?}", write.into_handle(), self.addresses.key_of(write));
        }
        if b.aborted {
            log::debug!(" - aborted");
        }
    }

    pub(crate) fn new(
        commands: Box<[Rc<dyn ICommand>]>,
        behaviours: Vec<CmdBehaviour>,
        roots: BTreeSet<StateAddress>,
        addresses: StateAddressMap,
    ) -> Self {
        debug_assert_eq!(commands.len(), behaviours.len());
        Self { commands, behaviours: behaviours.into_boxed_slice(), roots, addresses }
    }
}

impl fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("commands", &self.commands.len())
            .field("addresses", &self.addresses.len())
            .field("roots", &self.roots)
            .finish()
    }
}
