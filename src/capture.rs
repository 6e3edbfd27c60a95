use crate::{SymbolStr, base::CancelToken};
use bitflags::bitflags;
use std::{any::Any, collections::HashMap, fmt, rc::Rc};

/// Command id: the 0-based position of a command inside its capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CmdId(pub u64);

impl CmdId {
    pub fn from_index(index: usize) -> Self {
        Self(index as u64)
    }
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CmdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

/// Tag of the graphics API a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiId(pub u32);

bitflags! {
    /// 命令的元数据标记, 只用于统计和日志.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandFlags: u32 {
        const DRAW_CALL    = 1 << 0;
        const END_OF_FRAME = 1 << 1;
    }
}

/// A half-open range of pool memory observed by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRange {
    pub base: u64,
    pub size: u64,
}

/// Memory observations attached to a command. Statistics only; the
/// dependency analysis never looks at these.
#[derive(Debug, Clone, Default)]
pub struct Observations {
    pub reads: Vec<MemRange>,
    pub writes: Vec<MemRange>,
}

impl Observations {
    pub fn read_bytes(&self) -> u64 {
        self.reads.iter().map(|r| r.size).sum()
    }
    pub fn write_bytes(&self) -> u64 {
        self.writes.iter().map(|w| w.size).sum()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MutateError {
    /// The caller raised the cancellation flag; the whole build stops.
    #[error("command mutation canceled")]
    Canceled,
    /// The mutation failed. The command is recorded as aborted and the
    /// build continues as if it had no effect.
    #[error("command mutation aborted: {0}")]
    Aborted(SymbolStr),
}

pub type MutateRes = Result<(), MutateError>;

/// One recorded graphics command (an "atom" of the capture).
///
/// Commands are opaque to the core: the only things it relies on are the
/// API tag and the ability to replay the command's effect into a
/// simulated state. Flags and observations feed statistics.
pub trait ICommand: fmt::Debug {
    fn api(&self) -> ApiId;

    /// Short display name for logs, e.g. `glDrawArrays`.
    fn name(&self) -> &str;

    /// Apply this command's effect to the simulated state exactly once.
    fn mutate(&self, state: &mut ReplayState, cancel: &CancelToken) -> MutateRes;

    fn flags(&self) -> CommandFlags {
        CommandFlags::empty()
    }

    fn observations(&self) -> Option<&Observations> {
        None
    }

    /// Downcast support for footprint providers, which know the concrete
    /// command types of their own API.
    fn as_any(&self) -> &dyn Any;
}

/// Simulated replay state: one opaque slot per API.
///
/// 各 API 的状态结构只有它自己的 provider 认识, 这里只负责按 ApiId
/// 存取. 内存池的区间记账不在这一层, 它只以状态地址的身份出现.
#[derive(Default)]
pub struct ReplayState {
    slots: HashMap<ApiId, Box<dyn Any>>,
}

impl ReplayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the state slot of `api`, inserting a default value on first
    /// access.
    pub fn api_state<T: Any + Default>(&mut self, api: ApiId) -> &mut T {
        self.slots
            .entry(api)
            .or_insert_with(|| Box::new(T::default()))
            .downcast_mut::<T>()
            .expect("ReplayState slot accessed with a mismatched state type")
    }

    pub fn get_api_state<T: Any>(&self, api: ApiId) -> Option<&T> {
        self.slots.get(&api)?.downcast_ref::<T>()
    }
}

impl fmt::Debug for ReplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut apis: Vec<ApiId> = self.slots.keys().copied().collect();
        apis.sort();
        f.debug_struct("ReplayState").field("apis", &apis).finish()
    }
}

/// Identity of a capture; the graph cache is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaptureId(pub u64);

/// An ordered, immutable record of commands plus an initial-state factory.
pub struct Capture {
    pub id: CaptureId,
    pub name: SymbolStr,
    pub commands: Box<[Rc<dyn ICommand>]>,
    state_factory: Box<dyn Fn() -> ReplayState>,
}

impl Capture {
    pub fn new(id: CaptureId, name: impl Into<SymbolStr>, commands: Vec<Rc<dyn ICommand>>) -> Self {
        Self::with_state_factory(id, name, commands, ReplayState::new)
    }

    /// Captures whose initial state is not empty (e.g. mid-trace
    /// captures) supply their own factory.
    pub fn with_state_factory(
        id: CaptureId,
        name: impl Into<SymbolStr>,
        commands: Vec<Rc<dyn ICommand>>,
        state_factory: impl Fn() -> ReplayState + 'static,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            commands: commands.into_boxed_slice(),
            state_factory: Box::new(state_factory),
        }
    }

    /// Fresh simulated state for one build of this capture.
    pub fn new_state(&self) -> ReplayState {
        (self.state_factory)()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capture")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("commands", &self.commands.len())
            .finish()
    }
}
