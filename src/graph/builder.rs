use crate::{
    base::CancelToken,
    capture::{ApiId, Capture, CaptureId, CmdId, MutateError},
    graph::{
        ApiRegistry, CmdBehaviour, DependencyGraph, IBehaviourProvider, StateAddress,
        StateAddressMap, StateKey,
    },
};
use std::{
    cell::RefCell,
    collections::{BTreeSet, HashMap},
    rc::Rc,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
    /// Cancellation observed during the build; the partial graph is
    /// discarded.
    #[error("dependency graph build canceled")]
    Canceled,
}

pub type BuildRes<T> = Result<T, BuildError>;

/// Dependency graph under construction. Providers see it through
/// `intern` and `set_root` while their command is being simulated.
pub struct GraphBuilder {
    behaviours: Vec<CmdBehaviour>,
    addresses: StateAddressMap,
    roots: BTreeSet<StateAddress>,
}

impl GraphBuilder {
    /// Build the dependency graph of `capture`: walk the command list in
    /// order, simulate every command into a fresh state, and record the
    /// footprint each API provider observes.
    pub fn build(
        capture: &Capture,
        registry: &ApiRegistry,
        cancel: &CancelToken,
    ) -> BuildRes<DependencyGraph> {
        let mut builder = Self {
            behaviours: Vec::with_capacity(capture.len()),
            addresses: StateAddressMap::new(),
            roots: BTreeSet::new(),
        };
        builder.run(capture, registry, cancel)?;

        let Self { behaviours, addresses, mut roots } = builder;
        for behaviour in &behaviours {
            roots.extend(behaviour.roots.iter().copied());
        }
        log::debug!(
            "dependency graph for {:?}: {} commands, {} state addresses, {} roots",
            capture.name,
            behaviours.len(),
            addresses.len(),
            roots.len(),
        );
        Ok(DependencyGraph::new(capture.commands.clone(), behaviours, roots, addresses))
    }

    fn run(
        &mut self,
        capture: &Capture,
        registry: &ApiRegistry,
        cancel: &CancelToken,
    ) -> BuildRes<()> {
        let mut state = capture.new_state();
        // 每个 API 在一次构建中只实例化一个 provider; None 表示该 API
        // 不提供足迹信息.
        let mut providers: HashMap<ApiId, Option<Box<dyn IBehaviourProvider>>> = HashMap::new();

        for (index, cmd) in capture.commands.iter().enumerate() {
            if cancel.is_canceled() {
                return Err(BuildError::Canceled);
            }
            let id = CmdId::from_index(index);
            let provider = providers
                .entry(cmd.api())
                .or_insert_with(|| registry.get(cmd.api()).and_then(|api| api.new_behaviour_provider()));

            let behaviour = match provider {
                Some(provider) => provider.behaviour_for(&mut state, id, self, cmd.as_ref()),
                None => {
                    // API 不参与依赖分析: 命令无条件保活, 但仍然要模拟它,
                    // 后面其他 API 的命令可能依赖它的副作用.
                    let mut behaviour = CmdBehaviour { keep_alive: true, ..Default::default() };
                    match cmd.mutate(&mut state, cancel) {
                        Ok(()) => {}
                        Err(MutateError::Canceled) => return Err(BuildError::Canceled),
                        Err(MutateError::Aborted(reason)) => {
                            log::warn!("{id} {}: {reason}", cmd.name());
                            behaviour.aborted = true;
                            behaviour.keep_alive = false;
                        }
                    }
                    behaviour
                }
            };
            self.behaviours.push(behaviour);
        }
        Ok(())
    }

    /// Intern a state key into this graph's address space. Called by
    /// providers for every key their commands touch.
    pub fn intern(&mut self, key: &StateKey) -> StateAddress {
        self.addresses.intern(key)
    }

    /// Mark a state region as a root: it is treated as live at every
    /// requested command, e.g. the framebuffer.
    pub fn set_root(&mut self, key: &StateKey) -> StateAddress {
        let addr = self.addresses.intern(key);
        self.roots.insert(addr);
        addr
    }
}

/// Memoized graph builds, one per capture identity.
///
/// The graph is a pure function of capture content, so one build serves
/// every later request on the same capture. A canceled build is not
/// cached and will be retried by the next caller.
#[derive(Default)]
pub struct GraphCache {
    graphs: RefCell<HashMap<CaptureId, Rc<DependencyGraph>>>,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &self,
        capture: &Capture,
        registry: &ApiRegistry,
        cancel: &CancelToken,
    ) -> BuildRes<Rc<DependencyGraph>> {
        if let Some(graph) = self.graphs.borrow().get(&capture.id) {
            return Ok(graph.clone());
        }
        let graph = Rc::new(GraphBuilder::build(capture, registry, cancel)?);
        self.graphs.borrow_mut().insert(capture.id, graph.clone());
        Ok(graph)
    }

    pub fn evict(&self, id: CaptureId) {
        self.graphs.borrow_mut().remove(&id);
    }
}
