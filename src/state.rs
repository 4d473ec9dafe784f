//! The annealer's search variable: a layering of the graph.
//!
//! A [`State`] partitions the design's nodes into an ordered list of layers.
//! Layer 0 holds exactly the constants and inputs, the last layer holds
//! exactly the outputs, and every intermediate layer holds composites only.
//! Layers are stored compactly as one permutation of node indices plus the
//! start position of each layer.
//!
//! States are cheap value-like structures; the optimizer copies them freely
//! and every worker mutates only its own copy.

use std::sync::Arc;

use rand::Rng;

use crate::design::{Design, LinkKind, NodeKind, DOWNSTREAM, UPSTREAM};

/// One relocation of a composite to a position on the half-integer layer
/// axis: even positions name existing layers, odd positions name fresh
/// layers between adjacent pairs.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Move {
    pub node: usize,
    pub layer2: usize,
}

/// A layering of the design: the simulated annealer's state.
#[derive(Clone, Debug)]
pub struct State {
    pub(crate) iteration: usize,
    pub(crate) design: Arc<Design>,
    pub(crate) node_indices: Vec<usize>,
    pub(crate) layers: Vec<usize>,
}

impl Design {
    /// The canonical starting layering: constants and inputs up front, each
    /// composite in its own layer in declaration order, outputs last.
    pub fn initial(self: &Arc<Self>) -> State {
        let mut state = State {
            iteration: 0,
            design: Arc::clone(self),
            node_indices: (0..self.node_count()).collect(),
            layers: Vec::with_capacity(self.composite_count + 2),
        };
        state.layers.push(0);
        for composite_index in 0..self.composite_count {
            state
                .layers
                .push(self.constant_count + self.input_count + composite_index);
        }
        state.layers.push(self.node_count() - self.output_count);
        state
    }
}

impl State {
    /// Number of neighbour proposals accepted to reach this state.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// The design this state lays out.
    pub fn design(&self) -> &Arc<Design> {
        &self.design
    }

    /// Layer start positions within the node permutation.
    pub fn layers(&self) -> &[usize] {
        &self.layers
    }

    pub(crate) fn layer_begins(&self, layer_index: usize) -> usize {
        if layer_index == self.layers.len() {
            return self.node_indices.len();
        }
        self.layers[layer_index]
    }

    pub(crate) fn layer_size(&self, layer_index: usize) -> usize {
        self.layer_begins(layer_index + 1) - self.layer_begins(layer_index)
    }

    pub(crate) fn node_to_layer(&self) -> Vec<usize> {
        let mut node_to_layer = vec![0; self.design.node_count()];
        for layer_index in 0..self.layers.len() {
            let begin = self.layer_begins(layer_index);
            let end = self.layer_begins(layer_index + 1);
            for &node_index in &self.node_indices[begin..end] {
                node_to_layer[node_index] = layer_index;
            }
        }
        node_to_layer
    }

    /// Copy of a layer's members with `extra_node_index` inserted at its
    /// proper position: immediately adjacent to the one member it shares a
    /// binary link with, otherwise up front, or at the back for a select.
    ///
    /// Assumes the insertion itself cannot violate inter-layer order; only
    /// the position within the layer is decided here.
    pub(crate) fn insert_node(&self, layer_index: usize, extra_node_index: usize) -> Vec<usize> {
        let begin = self.layer_begins(layer_index);
        let end = self.layer_begins(layer_index + 1);
        let mut members: Vec<usize> = self.node_indices[begin..end].to_vec();
        let mut insert_at = if self.design.nodes[extra_node_index].kind == NodeKind::Select {
            members.len()
        } else {
            0
        };
        for (offset, &node_index) in self.node_indices[begin..end].iter().enumerate() {
            let node = &self.design.nodes[node_index];
            for dir in [UPSTREAM, DOWNSTREAM] {
                for &link_index in &node.links[dir] {
                    let link = &self.design.links[link_index];
                    if link.kind == LinkKind::ToBinary && link.ends[dir].node == extra_node_index {
                        // order between layers holds, so this runs in only
                        // one of the dir iterations
                        insert_at = if dir == UPSTREAM { offset } else { offset + 1 };
                    }
                }
            }
        }
        members.insert(insert_at, extra_node_index);
        members
    }

    /// Enumerate every legal relocation of a single composite.
    ///
    /// Destinations are positions on the half-integer axis `0..2L`: even
    /// positions are existing intermediate layers (subject to
    /// `check_layer` after insertion), odd positions are fresh layers.
    /// The composite may not land outside the span of its upstream and
    /// downstream peers, nor back in its current layer, nor next to its
    /// current layer when that layer would simply vanish.
    pub(crate) fn valid_moves(&self) -> Vec<Move> {
        let node_to_layer = self.node_to_layer();
        let mut moves = Vec::new();
        for composite_index in 0..self.design.composite_count {
            let node_index = self.design.constant_count + self.design.input_count + composite_index;
            let node = &self.design.nodes[node_index];
            let current_layer = node_to_layer[node_index];
            // anywhere between before the first and after the last composite layer
            let mut limit: [i64; 2] = [1, self.layers.len() as i64 * 2 - 3];
            let mut skip: [i64; 2] = [current_layer as i64 * 2, current_layer as i64 * 2];
            for dir in [UPSTREAM, DOWNSTREAM] {
                for &link_index in &node.links[dir] {
                    let linked = self.design.links[link_index].ends[dir].node;
                    let linked2 = node_to_layer[linked] as i64 * 2;
                    // stay within the closest neighbouring nodes
                    limit[dir] = if dir == UPSTREAM {
                        limit[dir].max(linked2)
                    } else {
                        limit[dir].min(linked2)
                    };
                }
                if self.layer_size(current_layer) == 1 {
                    // the current layer would just disappear, so the fresh
                    // positions flanking it are the current layer too
                    if dir == UPSTREAM {
                        skip[dir] -= 1;
                    } else {
                        skip[dir] += 1;
                    }
                }
            }
            for layer2 in limit[UPSTREAM]..=limit[DOWNSTREAM] {
                if layer2 >= skip[UPSTREAM] && layer2 <= skip[DOWNSTREAM] {
                    continue;
                }
                if layer2 % 2 == 0
                    && self
                        .design
                        .check_layer(&self.insert_node(layer2 as usize / 2, node_index))
                        .is_none()
                {
                    continue;
                }
                moves.push(Move {
                    node: node_index,
                    layer2: layer2 as usize,
                });
            }
        }
        moves
    }

    /// Pick a uniformly random valid move and apply it, producing the
    /// neighbouring state. Returns a plain copy when no move exists.
    pub fn random_neighbour<R: Rng>(&self, rng: &mut R) -> State {
        let moves = self.valid_moves();
        if moves.is_empty() {
            return self.clone();
        }
        let chosen = moves[rng.random_range(0..moves.len())];
        let mut neighbour = State {
            iteration: self.iteration + 1,
            design: Arc::clone(&self.design),
            node_indices: Vec::with_capacity(self.node_indices.len()),
            layers: Vec::with_capacity(self.layers.len() + 1),
        };
        let node_to_layer = self.node_to_layer();
        for layer2 in 0..self.layers.len() * 2 {
            if layer2 % 2 == 1 {
                if layer2 == chosen.layer2 {
                    neighbour.layers.push(neighbour.node_indices.len());
                    neighbour.node_indices.push(chosen.node);
                }
                continue;
            }
            let layer_index = layer2 / 2;
            let begin = self.layer_begins(layer_index);
            let end = self.layer_begins(layer_index + 1);
            if node_to_layer[chosen.node] == layer_index {
                if self.layer_size(layer_index) > 1 {
                    neighbour.layers.push(neighbour.node_indices.len());
                    neighbour.node_indices.extend(
                        self.node_indices[begin..end]
                            .iter()
                            .copied()
                            .filter(|&node_index| node_index != chosen.node),
                    );
                }
            } else {
                neighbour.layers.push(neighbour.node_indices.len());
                if layer2 == chosen.layer2 {
                    neighbour
                        .node_indices
                        .extend(self.insert_node(layer_index, chosen.node));
                } else {
                    neighbour
                        .node_indices
                        .extend_from_slice(&self.node_indices[begin..end]);
                }
            }
        }
        debug_assert_eq!(neighbour.node_indices.len(), self.design.node_count());
        neighbour
    }
}
