/*!
 * Coco Table
 * The concurrency coordinator: per-(scope, tier) ordered lists,
 * arbitration between contending requests, and apply/tear dispatch
 *
 * Only the dispatcher thread calls in, so the table carries no lock.
 * Every other thread (timers, GC, ingress) submits messages instead.
 */

use log::{error, warn};
use std::sync::Arc;

use super::arena::{CocoNode, NodeArena, NIL};
use crate::applier::Applier;
use crate::core::errors::{Result, TuneError};
use crate::core::types::PriorityTier;
use crate::registry::resource::ResourceRegistry;
use crate::request::manager::NodeRef;
use crate::request::types::Request;

/// One doubly-linked list, stored as head/tail arena indices
#[derive(Debug, Clone, Copy)]
struct TierList {
    head: u32,
    tail: u32,
    len: usize,
}

impl TierList {
    const EMPTY: TierList = TierList {
        head: NIL,
        tail: NIL,
        len: 0,
    };
}

pub struct CocoTable {
    registry: Arc<ResourceRegistry>,
    applier: Arc<dyn Applier>,
    arena: NodeArena,
    /// `[flat scope][tier]` lists
    lists: Vec<[TierList; PriorityTier::COUNT]>,
    /// Arena id of the node currently applied per scope, NIL when the
    /// scope sits at its default
    applied_node: Vec<u32>,
    /// Cache of the winning tier per scope
    applied_tier: Vec<Option<PriorityTier>>,
}

impl CocoTable {
    pub fn new(registry: Arc<ResourceRegistry>, applier: Arc<dyn Applier>) -> Self {
        let scopes = registry.total_scopes();
        Self {
            registry,
            applier,
            arena: NodeArena::new(),
            lists: vec![[TierList::EMPTY; PriorityTier::COUNT]; scopes],
            applied_node: vec![NIL; scopes],
            applied_tier: vec![None; scopes],
        }
    }

    /// Place every resource of a request into its list and run arbitration
    /// per touched scope. On failure the partial placement is rolled back.
    pub fn insert_request(&mut self, request: &Request) -> Result<Vec<NodeRef>> {
        let mut placed = Vec::with_capacity(request.resources.len());
        for tuple in &request.resources {
            let Some(scope) = self.registry.scope_index(tuple.res_code, tuple.res_info) else {
                error!(
                    "handle {}: resource {:#x} qualifier {} has no scope slot",
                    request.handle, tuple.res_code, tuple.res_info
                );
                self.remove_nodes(&placed);
                return Err(TuneError::Internal(format!(
                    "unplaceable resource {:#x}",
                    tuple.res_code
                )));
            };

            let node = CocoNode::new(
                request.handle,
                request.tier,
                tuple.value,
                tuple.res_info,
                scope,
            );
            let id = self.arena.alloc(node);
            self.link(scope, request.tier, id);
            placed.push(NodeRef { scope, node: id });
            self.arbitrate(scope);
        }
        Ok(placed)
    }

    /// Unlink every node of a request, promoting successors or tearing
    /// down each affected scope
    pub fn remove_nodes(&mut self, nodes: &[NodeRef]) {
        for &NodeRef { scope, node } in nodes {
            let Some(tier) = self.arena.get(node).map(|n| n.tier) else {
                warn!("node {} in scope {} already gone", node, scope);
                continue;
            };
            self.unlink(scope, tier, node);
            let _ = self.arena.free(node);
            self.arbitrate(scope);
        }
    }

    /// Currently applied (tier, value) for a scope, if any
    pub fn applied(&self, scope: usize) -> Option<(PriorityTier, i32)> {
        let id = *self.applied_node.get(scope)?;
        if id == NIL {
            return None;
        }
        let node = self.arena.get(id)?;
        Some((node.tier, node.value))
    }

    /// Live nodes across all scopes
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Winner for a scope: head of the most dominant non-empty tier list
    fn winner_of(&self, scope: usize) -> u32 {
        for tier in PriorityTier::ALL {
            let head = self.lists[scope][tier.index()].head;
            if head != NIL {
                return head;
            }
        }
        NIL
    }

    /// Re-read the winner and, when its identity changed, invoke exactly
    /// one apply (promotion) or tear (scope emptied) transition.
    fn arbitrate(&mut self, scope: usize) {
        let winner = self.winner_of(scope);
        if winner == self.applied_node[scope] {
            // Covers both fast paths: an insert that did not take the
            // head, and a removal of a non-winning node.
            return;
        }

        if winner == NIL {
            let desc = self.registry.slot_owner(scope);
            let qualifier = self.registry.slot_qualifier(scope);
            let default = self.registry.default_for(desc, qualifier);
            match &desc.tear_cb {
                Some(cb) => cb(desc, qualifier, default),
                None => self.applier.tear(desc, qualifier, default),
            }
            self.applied_node[scope] = NIL;
            self.applied_tier[scope] = None;
        } else {
            let (tier, qualifier, value) = {
                let node = self.arena.get(winner).expect("winner must be live");
                (node.tier, node.qualifier, node.value)
            };
            let desc = self.registry.slot_owner(scope);
            match &desc.apply_cb {
                Some(cb) => cb(desc, qualifier, value),
                None => self.applier.apply(desc, qualifier, value),
            }
            self.applied_node[scope] = winner;
            self.applied_tier[scope] = Some(tier);
        }
    }

    /// Insert a node into its (scope, tier) list per the resource policy
    fn link(&mut self, scope: usize, tier: PriorityTier, id: u32) {
        use crate::core::types::Policy;

        let policy = self.registry.slot_owner(scope).policy;
        match policy {
            Policy::Instant => self.insert_front(scope, tier, id),
            Policy::LazyFifo => self.insert_back(scope, tier, id),
            Policy::HigherIsBetter => {
                let value = self.arena.get(id).expect("fresh node").value;
                let before = self.find_first(scope, tier, |v| v < value);
                self.insert_before(scope, tier, id, before);
            }
            Policy::LowerIsBetter => {
                let value = self.arena.get(id).expect("fresh node").value;
                let before = self.find_first(scope, tier, |v| v > value);
                self.insert_before(scope, tier, id, before);
            }
        }
    }

    /// First node whose value satisfies `pred`, walking from the head.
    /// Equal values never satisfy the predicate, which keeps ties FIFO.
    fn find_first(&self, scope: usize, tier: PriorityTier, pred: impl Fn(i32) -> bool) -> u32 {
        let mut cur = self.lists[scope][tier.index()].head;
        while cur != NIL {
            let node = self.arena.get(cur).expect("linked node");
            if pred(node.value) {
                return cur;
            }
            cur = node.next;
        }
        NIL
    }

    fn insert_front(&mut self, scope: usize, tier: PriorityTier, id: u32) {
        let list = &mut self.lists[scope][tier.index()];
        let old_head = list.head;
        list.head = id;
        if old_head == NIL {
            list.tail = id;
        }
        list.len += 1;
        {
            let node = self.arena.get_mut(id).expect("fresh node");
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.arena.get_mut(old_head).expect("old head").prev = id;
        }
    }

    fn insert_back(&mut self, scope: usize, tier: PriorityTier, id: u32) {
        let list = &mut self.lists[scope][tier.index()];
        let old_tail = list.tail;
        list.tail = id;
        if old_tail == NIL {
            list.head = id;
        }
        list.len += 1;
        {
            let node = self.arena.get_mut(id).expect("fresh node");
            node.prev = old_tail;
            node.next = NIL;
        }
        if old_tail != NIL {
            self.arena.get_mut(old_tail).expect("old tail").next = id;
        }
    }

    /// Insert `id` immediately before `before`; NIL appends
    fn insert_before(&mut self, scope: usize, tier: PriorityTier, id: u32, before: u32) {
        if before == NIL {
            self.insert_back(scope, tier, id);
            return;
        }
        if self.lists[scope][tier.index()].head == before {
            self.insert_front(scope, tier, id);
            return;
        }
        let prev = self.arena.get(before).expect("anchor node").prev;
        {
            let node = self.arena.get_mut(id).expect("fresh node");
            node.prev = prev;
            node.next = before;
        }
        self.arena.get_mut(before).expect("anchor node").prev = id;
        self.arena.get_mut(prev).expect("anchor prev").next = id;
        self.lists[scope][tier.index()].len += 1;
    }

    fn unlink(&mut self, scope: usize, tier: PriorityTier, id: u32) {
        let (prev, next) = {
            let node = self.arena.get(id).expect("linked node");
            (node.prev, node.next)
        };
        if prev != NIL {
            self.arena.get_mut(prev).expect("prev node").next = next;
        }
        if next != NIL {
            self.arena.get_mut(next).expect("next node").prev = prev;
        }
        let list = &mut self.lists[scope][tier.index()];
        if list.head == id {
            list.head = next;
        }
        if list.tail == id {
            list.tail = prev;
        }
        list.len -= 1;
    }
}
