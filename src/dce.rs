//! Dead-code elimination over a capture: backwards liveness sweep plus
//! the emitter for surviving commands.
//!
//! It is named after the standard compiler optimization: the simulated
//! state plays the memory, commands play the instructions reading and
//! writing it.

mod liveness;
mod test;

pub use liveness::LivenessTree;

use crate::{
    base::DenseBitSet,
    capture::{CmdId, CommandFlags, ICommand},
    graph::DependencyGraph,
};
use std::{collections::BTreeSet, rc::Rc};

#[derive(Debug, Clone, thiserror::Error)]
pub enum DceError {
    /// Request on a command id the capture does not have. Rejected up
    /// front so the sweep can assume every request is in range.
    #[error("requested {id} but the capture has only {len} commands")]
    StaleRequest { id: CmdId, len: usize },
}

pub type DceRes<T = ()> = Result<T, DceError>;

/// Downstream consumer of surviving commands. `emit` is called in
/// ascending command-id order.
pub trait ICommandSink {
    fn emit(&mut self, id: CmdId, cmd: &Rc<dyn ICommand>);
}

/// Counters of one sweep, reported to the observer and the debug log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub live_cmds: usize,
    pub dead_cmds: usize,
    pub live_draws: usize,
    pub dead_draws: usize,
    /// Bytes of observed memory reads on live / dead commands.
    pub live_bytes: u64,
    pub dead_bytes: u64,
}

/// Injected metrics observer. The core keeps no global counters; callers
/// that want sweep metrics pass an observer to `flush_observed`.
pub trait IStatsObserver {
    fn on_sweep(&mut self, stats: &SweepStats);
}

/// Dead-code elimination engine for one dependency graph.
///
/// Collect interest points with `request`, then `flush` to sweep and
/// emit every command whose effects are needed to reproduce the
/// observable state at those points, in original order.
pub struct DeadCodeElimination {
    graph: Rc<DependencyGraph>,
    requests: BTreeSet<CmdId>,
    last_request: CmdId,
}

impl DeadCodeElimination {
    pub fn new(graph: Rc<DependencyGraph>) -> Self {
        Self { graph, requests: BTreeSet::new(), last_request: CmdId::default() }
    }

    pub fn graph(&self) -> &Rc<DependencyGraph> {
        &self.graph
    }

    /// Record an interest point: everything needed to reproduce the
    /// observable state right after `id` stays alive.
    pub fn request(&mut self, id: CmdId) -> DceRes {
        if id.index() >= self.graph.len() {
            return Err(DceError::StaleRequest { id, len: self.graph.len() });
        }
        self.requests.insert(id);
        if id > self.last_request {
            self.last_request = id;
        }
        Ok(())
    }

    /// Sweep and forward surviving commands to `sink`. Commands past the
    /// last requested id are never emitted.
    pub fn flush(&self, sink: &mut dyn ICommandSink) -> SweepStats {
        if self.graph.is_empty() {
            return SweepStats::default();
        }
        let is_live = self.propagate_liveness();
        let stats = self.collect_stats(&is_live);
        for index in is_live.iter_ones() {
            sink.emit(CmdId::from_index(index), &self.graph.commands[index]);
        }
        stats
    }

    /// Like `flush`, reporting the sweep counters to `observer`.
    pub fn flush_observed(
        &self,
        sink: &mut dyn ICommandSink,
        observer: &mut dyn IStatsObserver,
    ) -> SweepStats {
        let stats = self.flush(sink);
        observer.on_sweep(&stats);
        stats
    }

    /// Backwards live-variable analysis over the command list.
    ///
    /// 从 lastRequest 往前扫. 对每条命令: 先处理 writes (整体覆盖,
    /// 旧值被杀死, 需要这个状态的下游由本命令供给), 再看 modifies 是否
    /// 命中活状态, 最后在命令确定存活时才把它的输入标活 (gen). 一个
    /// 地址同时出现在 writes 和 modifies 时, 先杀后生, 正好是
    /// read-modify-write 的语义.
    fn propagate_liveness(&self) -> DenseBitSet {
        let count = self.last_request.index() + 1;
        let mut is_live = DenseBitSet::with_len(count);
        let mut tree = LivenessTree::from_hierarchy(self.graph.addresses());

        for index in (0..count).rev() {
            let id = CmdId::from_index(index);
            let behaviour = &self.graph.behaviours[index];
            let mut live = behaviour.keep_alive;

            // 中止的命令没有效果, 永远不参与依赖传播.
            if behaviour.aborted {
                is_live.set(index, live);
                continue;
            }
            if self.requests.contains(&id) {
                live = true;
                for &root in &self.graph.roots {
                    tree.mark_live(root);
                }
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("requested {id}: {:?}", self.graph.commands[index]);
                    self.graph.dump_behaviour(id);
                }
            }
            for &write in &behaviour.writes {
                if tree.is_live(write) {
                    live = true;
                }
                tree.mark_dead(write); // KILL
            }
            for &modify in &behaviour.modifies {
                // 也是一种输出; 但它同时是读, 标活要等到下面统一做,
                // 不能在这里就杀掉旧值.
                if tree.is_live(modify) {
                    live = true;
                }
            }
            if live {
                for &modify in &behaviour.modifies {
                    tree.mark_live(modify); // GEN
                }
                for &read in &behaviour.reads {
                    tree.mark_live(read); // GEN
                }
            }
            is_live.set(index, live);
        }
        is_live
    }

    fn collect_stats(&self, is_live: &DenseBitSet) -> SweepStats {
        let mut stats = SweepStats::default();
        for index in 0..is_live.len() {
            let cmd = &self.graph.commands[index];
            let is_draw = cmd.flags().contains(CommandFlags::DRAW_CALL);
            let bytes = cmd.observations().map_or(0, |obs| obs.read_bytes());
            if is_live.get(index) {
                stats.live_cmds += 1;
                stats.live_draws += usize::from(is_draw);
                stats.live_bytes += bytes;
            } else {
                stats.dead_cmds += 1;
                stats.dead_draws += usize::from(is_draw);
                stats.dead_bytes += bytes;
            }
        }
        let total = stats.live_cmds + stats.dead_cmds;
        log::debug!(
            "DCE: dead: {}% {} cmds {} draws, live: {}% {} cmds {} draws",
            100 * stats.dead_cmds / total,
            stats.dead_cmds,
            stats.dead_draws,
            100 * stats.live_cmds / total,
            stats.live_cmds,
            stats.live_draws,
        );
        stats
    }
}
