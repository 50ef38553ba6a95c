//! Search tree storage, rebuilt from a fresh root for every search.

use std::ops::{Index, IndexMut};

use sc_core::{apply_move, ApplyError, GameState};

use crate::node::{Node, NodeId, NO_CHILD};

pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(n),
        }
    }

    /// Drop every node and plant `root`. Allocation is kept across searches.
    pub fn reset(&mut self, root: GameState) -> NodeId {
        self.nodes.clear();
        self.nodes.push(Node::new(root));
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Child of `parent` along action `a`, created on first visit.
    pub fn child(&mut self, parent: NodeId, a: usize) -> Result<NodeId, ApplyError> {
        let existing = self[parent].children[a];
        if existing != NO_CHILD {
            return Ok(existing);
        }
        let t = apply_move(&self[parent].state, a)?;
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node::new(t.state));
        self[parent].children[a] = id;
        Ok(id)
    }
}

impl Index<NodeId> for Tree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }
}

impl IndexMut<NodeId> for Tree {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sc_core::initial_state;

    #[test]
    fn children_are_created_once_and_reset_clears() {
        let mut t = Tree::with_capacity(4);
        let root = t.reset(initial_state(50));
        let c = t.child(root, 0).unwrap();
        assert_eq!(t.child(root, 0).unwrap(), c);
        assert_eq!(t.len(), 2);
        assert_eq!(t[c].state.ply, 1);

        let root = t.reset(initial_state(50));
        assert_eq!(t.len(), 1);
        assert!(t[root].children.iter().all(|&c| c == NO_CHILD));
    }
}
