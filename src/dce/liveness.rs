use crate::{
    base::INullableValue,
    graph::{StateAddress, StateAddressMap},
};
use smallvec::SmallVec;

/// Hierarchical live/dead labeling over the state-address forest.
///
/// 每个节点对应一个状态地址, 子节点是父区域的子区域. 一次标记要对整棵
/// 子树生效, 所以不能逐个节点去写; 这里用两个懒惰标记做到 O(深度):
///
/// * `any_live`: 本节点及其所有后代的 `live` 的并.
/// * `timestamp`: 最后一次直接写本节点的时钟. 祖先的时间戳更新时,
///   时间戳更小的后代等同于被整体覆盖 ("effectively deleted"), 查询和
///   上浮传播时按需把它们物化回来.
///
/// 这个标签是保守的上近似: `mark_dead` 不会回头清掉祖先上已经传播的
/// `any_live`, 所以一个节点在它唯一的活后代被杀死之后仍然报告活,
/// 直到某个更新的祖先写遮蔽它. 对消除来说这只会多保留命令, 不会把
/// 需要的命令判死.
pub struct LivenessTree {
    nodes: Box<[LivenessNode]>,
    time: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct LivenessNode {
    live: bool,
    any_live: bool,
    timestamp: u32,
    parent: Option<u32>,
}

impl LivenessTree {
    /// Build a tree over the hierarchy of `map`, everything dead.
    pub fn from_hierarchy(map: &StateAddressMap) -> Self {
        let mut nodes = vec![LivenessNode::default(); map.len()];
        for index in 0..map.len() {
            let parent = map.parent_of(StateAddress::from_handle(index as u32));
            if parent.is_nonnull() {
                nodes[index].parent = Some(parent.into_handle());
            }
        }
        Self { nodes: nodes.into_boxed_slice(), time: 1 }
    }

    /// True if `addr` or any of its descendants is live, taking shadowing
    /// ancestor writes into account.
    pub fn is_live(&self, addr: StateAddress) -> bool {
        let mut node = &self.nodes[addr.index()];
        let mut live = node.any_live;
        let mut parent = node.parent;
        while let Some(index) = parent {
            let p = &self.nodes[index as usize];
            if p.timestamp > node.timestamp {
                // 更新的祖先写覆盖了我们看到的子树, 改用它的值.
                node = p;
                live = p.live;
            }
            parent = p.parent;
        }
        live
    }

    /// Make `addr` and all of its descendants live.
    pub fn mark_live(&mut self, addr: StateAddress) {
        let stamp = self.tick();
        let node = &mut self.nodes[addr.index()];
        node.live = true;
        node.any_live = true;
        node.timestamp = stamp;

        // 自顶向下把 any_live 传播到整条祖先链. 途中遇到被更新祖先
        // 覆盖过的节点, 先从父节点物化它的当前值再继续.
        let mut chain: SmallVec<[u32; 16]> = SmallVec::new();
        let mut parent = node.parent;
        while let Some(index) = parent {
            chain.push(index);
            parent = self.nodes[index as usize].parent;
        }
        for &index in chain.iter().rev() {
            let inherited = self.nodes[index as usize]
                .parent
                .map(|p| {
                    let p = &self.nodes[p as usize];
                    (p.live, p.timestamp)
                });
            let node = &mut self.nodes[index as usize];
            if let Some((live, timestamp)) = inherited {
                if node.timestamp < timestamp {
                    node.live = live;
                    node.timestamp = timestamp;
                }
            }
            node.any_live = true;
        }
    }

    /// Make `addr` and all of its descendants dead. Ancestors are not
    /// touched: a newer-stamped ancestor write still revives the subtree,
    /// and an ancestor's `any_live` stays set even when this was its last
    /// live descendant. See the conservative contract on the type.
    pub fn mark_dead(&mut self, addr: StateAddress) {
        let stamp = self.tick();
        let node = &mut self.nodes[addr.index()];
        node.live = false;
        node.any_live = false;
        node.timestamp = stamp;
    }

    fn tick(&mut self) -> u32 {
        let now = self.time;
        self.time += 1;
        now
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::{
        graph::StateAddressMap,
        testing::cases::RegionKey,
    };

    /// 三层结构: root 下面 mid, mid 下面 leaf_a / leaf_b.
    fn hierarchy() -> (StateAddressMap, StateAddress, StateAddress, StateAddress, StateAddress) {
        let mut map = StateAddressMap::new();
        let root = RegionKey::root("root");
        let mid = RegionKey::child("mid", &root);
        let leaf_a = map.intern(&RegionKey::child("leaf_a", &mid));
        let leaf_b = map.intern(&RegionKey::child("leaf_b", &mid));
        let mid = map.lookup(&mid).unwrap();
        let root = map.lookup(&root).unwrap();
        (map, root, mid, leaf_a, leaf_b)
    }

    #[test]
    fn test_leaf_marks_ancestors_visible() {
        let (map, root, mid, leaf_a, leaf_b) = hierarchy();
        let mut tree = LivenessTree::from_hierarchy(&map);

        assert!(!tree.is_live(root));
        tree.mark_live(leaf_a);
        assert!(tree.is_live(leaf_a));
        assert!(tree.is_live(mid));
        assert!(tree.is_live(root));
        assert!(!tree.is_live(leaf_b));
    }

    #[test]
    fn test_ancestor_write_shadows_subtree() {
        let (map, root, mid, leaf_a, leaf_b) = hierarchy();
        let mut tree = LivenessTree::from_hierarchy(&map);

        tree.mark_live(leaf_a);
        tree.mark_dead(root);
        // root 的覆盖比 leaf_a 的标记新, 整棵子树都死了.
        assert!(!tree.is_live(leaf_a));
        assert!(!tree.is_live(mid));
        assert!(!tree.is_live(root));

        tree.mark_live(mid);
        assert!(tree.is_live(leaf_a));
        assert!(tree.is_live(leaf_b));
        assert!(tree.is_live(root));
    }

    #[test]
    fn test_any_live_is_sticky_after_descendant_death() {
        let (map, root, mid, leaf_a, leaf_b) = hierarchy();
        let mut tree = LivenessTree::from_hierarchy(&map);

        tree.mark_live(leaf_a);
        tree.mark_dead(leaf_a);
        // 祖先的 any_live 不回收: mid 和 root 保守地继续报告活,
        // 直到一个更新的祖先写 (下面的 mark_dead(root)) 遮蔽它们.
        assert!(!tree.is_live(leaf_a));
        assert!(!tree.is_live(leaf_b));
        assert!(tree.is_live(mid));
        assert!(tree.is_live(root));

        tree.mark_dead(root);
        assert!(!tree.is_live(mid));
        assert!(!tree.is_live(root));
    }

    #[test]
    fn test_dead_leaf_under_live_parent() {
        let (map, _root, mid, leaf_a, leaf_b) = hierarchy();
        let mut tree = LivenessTree::from_hierarchy(&map);

        tree.mark_live(mid);
        tree.mark_dead(leaf_a);
        assert!(!tree.is_live(leaf_a));
        assert!(tree.is_live(leaf_b));
        assert!(tree.is_live(mid));
    }

    #[test]
    fn test_remateralize_on_propagation() {
        let (map, root, mid, leaf_a, leaf_b) = hierarchy();
        let mut tree = LivenessTree::from_hierarchy(&map);

        // root 覆盖为死之后, 在 leaf_a 上标活; 传播路径上的 mid 曾被
        // root 覆盖, 必须先物化成死再标 any_live, 否则 leaf_b 会误判.
        tree.mark_live(mid);
        tree.mark_dead(root);
        tree.mark_live(leaf_a);

        assert!(tree.is_live(leaf_a));
        assert!(tree.is_live(mid));
        assert!(tree.is_live(root));
        assert!(!tree.is_live(leaf_b));
    }
}
