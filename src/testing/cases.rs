use crate::{
    SymbolStr,
    base::CancelToken,
    capture::{
        ApiId, Capture, CaptureId, CmdId, CommandFlags, ICommand, MemRange, MutateError,
        MutateRes, Observations, ReplayState,
    },
    graph::{
        ApiRegistry, CmdBehaviour, DependencyGraph, GraphBuilder, IApi, IBehaviourProvider,
        IStateKey, StateKey,
    },
    dce::ICommandSink,
};
use std::{
    any::Any,
    hash::{Hash, Hasher},
    rc::Rc,
};

/// API tag of the scripted fixture commands.
pub const SCRIPT_API: ApiId = ApiId(1);
/// API tag without a footprint provider; its commands take the
/// keep-alive path through the builder.
pub const OPAQUE_API: ApiId = ApiId(2);

/// Named state region with an explicit parent link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionKey {
    pub name: SymbolStr,
    pub parent: Option<StateKey>,
}

impl RegionKey {
    pub fn root(name: impl Into<SymbolStr>) -> StateKey {
        StateKey::new(Self { name: name.into(), parent: None })
    }
    pub fn child(name: impl Into<SymbolStr>, parent: &StateKey) -> StateKey {
        StateKey::new(Self { name: name.into(), parent: Some(parent.clone()) })
    }
}

impl IStateKey for RegionKey {
    fn parent(&self) -> Option<StateKey> {
        self.parent.clone()
    }
    fn eq_dyn(&self, other: &dyn IStateKey) -> bool {
        other.as_any().downcast_ref::<Self>().is_some_and(|other| other == self)
    }
    fn hash_dyn(&self, mut hasher: &mut dyn Hasher) {
        self.hash(&mut hasher);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Simulated state slot of the fixture APIs: a journal of the commands
/// mutated into it, so tests can assert every command ran exactly once.
#[derive(Debug, Default)]
pub struct ScriptState {
    pub mutated: Vec<SymbolStr>,
}

/// One scripted command. Footprints, flags and failure behavior are all
/// declared by the test.
#[derive(Debug)]
pub struct ScriptCmd {
    pub api: ApiId,
    pub name: SymbolStr,
    pub flags: CommandFlags,
    pub observations: Option<Observations>,
    pub fail: bool,
    pub reads: Vec<StateKey>,
    pub modifies: Vec<StateKey>,
    pub writes: Vec<StateKey>,
    pub roots: Vec<StateKey>,
}

impl ScriptCmd {
    pub fn new(name: impl Into<SymbolStr>) -> Self {
        Self {
            api: SCRIPT_API,
            name: name.into(),
            flags: CommandFlags::empty(),
            observations: None,
            fail: false,
            reads: Vec::new(),
            modifies: Vec::new(),
            writes: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// A command of an API the registry does not know.
    pub fn opaque(name: impl Into<SymbolStr>) -> Self {
        Self { api: OPAQUE_API, ..Self::new(name) }
    }

    pub fn reads(mut self, key: &StateKey) -> Self {
        self.reads.push(key.clone());
        self
    }
    pub fn modifies(mut self, key: &StateKey) -> Self {
        self.modifies.push(key.clone());
        self
    }
    pub fn writes(mut self, key: &StateKey) -> Self {
        self.writes.push(key.clone());
        self
    }
    pub fn root(mut self, key: &StateKey) -> Self {
        self.roots.push(key.clone());
        self
    }
    pub fn fails(mut self) -> Self {
        self.fail = true;
        self
    }
    pub fn draw_call(mut self) -> Self {
        self.flags |= CommandFlags::DRAW_CALL;
        self
    }
    pub fn observing(mut self, read_bytes: u64) -> Self {
        self.observations = Some(Observations {
            reads: vec![MemRange { base: 0, size: read_bytes }],
            writes: Vec::new(),
        });
        self
    }
}

impl ICommand for ScriptCmd {
    fn api(&self) -> ApiId {
        self.api
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn mutate(&self, state: &mut ReplayState, cancel: &CancelToken) -> MutateRes {
        if cancel.is_canceled() {
            return Err(MutateError::Canceled);
        }
        if self.fail {
            return Err(MutateError::Aborted("scripted failure".into()));
        }
        state.api_state::<ScriptState>(self.api).mutated.push(self.name.clone());
        Ok(())
    }
    fn flags(&self) -> CommandFlags {
        self.flags
    }
    fn observations(&self) -> Option<&Observations> {
        self.observations.as_ref()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct ScriptApi;

impl IApi for ScriptApi {
    fn id(&self) -> ApiId {
        SCRIPT_API
    }
    fn name(&self) -> &str {
        "script"
    }
    fn new_behaviour_provider(&self) -> Option<Box<dyn IBehaviourProvider>> {
        Some(Box::new(ScriptProvider))
    }
}

struct ScriptProvider;

impl IBehaviourProvider for ScriptProvider {
    fn behaviour_for(
        &mut self,
        state: &mut ReplayState,
        _id: CmdId,
        builder: &mut GraphBuilder,
        cmd: &dyn ICommand,
    ) -> CmdBehaviour {
        let cmd = cmd
            .as_any()
            .downcast_ref::<ScriptCmd>()
            .expect("ScriptProvider fed with a foreign command");

        let mut behaviour = CmdBehaviour::default();
        if cmd.mutate(state, &CancelToken::new()).is_err() {
            behaviour.aborted = true;
            return behaviour;
        }
        for key in &cmd.reads {
            behaviour.read(builder, Some(key));
        }
        for key in &cmd.modifies {
            behaviour.modify(builder, Some(key));
        }
        for key in &cmd.writes {
            behaviour.write(builder, Some(key));
        }
        for key in &cmd.roots {
            behaviour.set_root(builder, Some(key));
        }
        behaviour
    }
}

/// Registry with the scripted API only. `OPAQUE_API` is deliberately
/// absent.
pub fn script_registry() -> ApiRegistry {
    let mut registry = ApiRegistry::new();
    registry.register(Rc::new(ScriptApi));
    registry
}

pub fn capture_of(id: u64, name: &str, cmds: Vec<ScriptCmd>) -> Capture {
    let commands = cmds
        .into_iter()
        .map(|cmd| Rc::new(cmd) as Rc<dyn ICommand>)
        .collect();
    Capture::new(CaptureId(id), name, commands)
}

/// Build a graph over scripted commands, panicking on cancellation.
pub fn build_script_graph(cmds: Vec<ScriptCmd>) -> Rc<DependencyGraph> {
    let capture = capture_of(1, "fixture", cmds);
    let graph = GraphBuilder::build(&capture, &script_registry(), &CancelToken::new())
        .expect("fixture build is never canceled");
    Rc::new(graph)
}

/// Sink recording emitted command ids, for order assertions.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub emitted: Vec<CmdId>,
}

impl ICommandSink for CollectSink {
    fn emit(&mut self, id: CmdId, _cmd: &Rc<dyn ICommand>) {
        self.emitted.push(id);
    }
}
