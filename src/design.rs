//! Immutable dataflow graph model.
//!
//! A [`Design`] is the compile-time input: the operator graph plus the target
//! budgets (work slots, storage slots, and the overhead penalty the annealer
//! pays per storage slot above budget). It is built once from a [`DesignSpec`]
//! and then shared read-only by every optimizer worker.
//!
//! The graph is index-based throughout: nodes, links, and sources refer to
//! each other by position in the design's flat vectors, and every link end
//! stores `(node, pos)` where `pos` is its index within the peer's
//! per-direction adjacency list. Nothing is ever removed or renumbered after
//! construction.

use crate::error::DesignError;

/// Number of binary operator tags the target understands.
pub const TMP_COUNT: usize = 12;

/// Which operator tags commute, indexed by tmp.
pub(crate) const TMP_COMMUTATIVE: [bool; TMP_COUNT] = [
    false, true, true, false, false, false, false, true, false, false, false, false,
];

/// The reserved marker constant; its storage slot anchors the plan's `Lcap`.
pub const LIFE3_VALUE: i32 = 0x1000_0003;

/// Constant values are confined to `[0, 0x40000000)`.
pub(crate) const CONSTANT_VALUE_LIMIT: i32 = 0x4000_0000;

/// Upper bound applied to every count-like quantity in a design.
pub(crate) const RANGE_LIMIT: i64 = 10000;

/// Index of the upstream end in per-link and per-node direction arrays.
pub(crate) const UPSTREAM: usize = 0;
/// Index of the downstream end in per-link and per-node direction arrays.
pub(crate) const DOWNSTREAM: usize = 1;

pub(crate) fn check_range(what: &'static str, value: i64, min: i64, max: i64) -> Result<(), DesignError> {
    if value < min || value >= max {
        return Err(DesignError::Range {
            what,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// What a link feeds on its downstream side.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum LinkKind {
    /// Parameter of a binary operator (also a select's condition stages).
    ToBinary,
    /// A select lane's nonzero-branch value.
    ToSelectNonzero,
    /// A select lane's zero-branch value.
    ToSelectZero,
    /// A pinned output.
    ToOutput,
}

/// One end of a link: the node it attaches to and the position of the link
/// within that node's adjacency list for the relevant direction.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LinkEnd {
    pub node: usize,
    pub pos: usize,
}

/// Directed edge between a producing source and a consuming node.
#[derive(Clone, Debug)]
pub(crate) struct Link {
    pub kind: LinkKind,
    /// `ends[UPSTREAM]` is the producer, `ends[DOWNSTREAM]` the consumer.
    pub ends: [LinkEnd; 2],
    /// Which of the producer's outputs this link carries.
    pub upstream_output: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum NodeKind {
    Constant,
    Input,
    Binary,
    Select,
    Output,
}

/// A graph node. Adjacency is stored as link indices, per direction.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub kind: NodeKind,
    /// `links[UPSTREAM]` feeds this node, `links[DOWNSTREAM]` consumes it.
    pub links: [Vec<usize>; 2],
    /// Operator tags: one entry for a binary, `stage_count - 1` for a select.
    pub tmps: Vec<usize>,
    /// Work slots this node occupies when scheduled alone in a layer.
    pub work_slots_needed: usize,
    /// Indices into the design's source table, one per output of this node.
    pub sources: Vec<usize>,
}

/// One output of one node, with its total downstream reference count.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SourceInfo {
    pub node: usize,
    pub output: usize,
    pub uses: usize,
}

/// An output pin: which source lands in which storage slot.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OutputLink {
    pub source: usize,
    pub storage_slot: usize,
}

/// Binary composite: one operator tag and two parameter sources.
///
/// The rhs parameter is loaded first; a same-layer producer may feed the lhs
/// parameter only when the operator commutes.
#[derive(Clone, Copy, Debug)]
pub struct BinarySpec {
    pub tmp: usize,
    pub rhs_source: usize,
    pub lhs_source: usize,
}

/// Select composite: a chain of condition stages multiplexing several lanes.
#[derive(Clone, Debug)]
pub struct SelectSpec {
    /// Per lane: `(nonzero_source, zero_source)`.
    pub lanes: Vec<(usize, usize)>,
    /// Condition chain sources, one per stage; at least two stages.
    pub stage_sources: Vec<usize>,
    /// Operator tags for stages `1..`, so `stage_sources.len() - 1` entries.
    pub stage_tmps: Vec<usize>,
}

#[derive(Clone, Debug)]
pub enum CompositeSpec {
    Binary(BinarySpec),
    Select(SelectSpec),
}

/// An output pin request.
#[derive(Clone, Copy, Debug)]
pub struct OutputSpec {
    pub source: usize,
    pub storage_slot: usize,
}

/// Raw description of a design, as parsed from text or built by a host.
///
/// [`DesignSpec::build`] validates every range and wires the graph.
#[derive(Clone, Debug, Default)]
pub struct DesignSpec {
    pub work_slots: usize,
    pub storage_slots: usize,
    pub storage_slot_overhead_penalty: f64,
    pub constant_values: Vec<i32>,
    pub input_storage_slots: Vec<usize>,
    pub clobber_storage_slots: Vec<usize>,
    pub composites: Vec<CompositeSpec>,
    pub outputs: Vec<OutputSpec>,
}

/// The immutable compile-time input: graph plus target budgets.
#[derive(Debug)]
pub struct Design {
    pub(crate) work_slots: usize,
    pub(crate) storage_slots: usize,
    pub(crate) storage_slot_overhead_penalty: f64,
    pub(crate) constant_count: usize,
    pub(crate) input_count: usize,
    pub(crate) composite_count: usize,
    pub(crate) output_count: usize,
    pub(crate) nodes: Vec<Node>,
    pub(crate) links: Vec<Link>,
    pub(crate) constant_values: Vec<i32>,
    pub(crate) input_storage_slots: Vec<usize>,
    pub(crate) clobber_storage_slots: Vec<usize>,
    pub(crate) output_links: Vec<OutputLink>,
    pub(crate) sources: Vec<SourceInfo>,
}

impl DesignSpec {
    /// Validate the spec and wire it into an immutable [`Design`].
    pub fn build(self) -> Result<Design, DesignError> {
        let constant_count = self.constant_values.len();
        let input_count = self.input_storage_slots.len();
        let composite_count = self.composites.len();
        let output_count = self.outputs.len();
        check_range("work slot budget", self.work_slots as i64, 2, RANGE_LIMIT)?;
        check_range("storage slot budget", self.storage_slots as i64, 1, RANGE_LIMIT)?;
        check_range("constant count", constant_count as i64, 0, RANGE_LIMIT)?;
        check_range("input count", input_count as i64, 1, RANGE_LIMIT)?;
        check_range("composite count", composite_count as i64, 1, RANGE_LIMIT)?;
        check_range("output count", output_count as i64, 1, RANGE_LIMIT)?;
        check_range(
            "constants plus inputs",
            (constant_count + input_count) as i64,
            0,
            self.storage_slots as i64 + 1,
        )?;
        check_range(
            "constants plus outputs",
            (constant_count + output_count) as i64,
            0,
            self.storage_slots as i64 + 1,
        )?;

        let node_count = constant_count + input_count + composite_count + output_count;
        let mut nodes: Vec<Node> = (0..node_count)
            .map(|_| Node {
                kind: NodeKind::Constant,
                links: [Vec::new(), Vec::new()],
                tmps: Vec::new(),
                work_slots_needed: 0,
                sources: Vec::new(),
            })
            .collect();
        let mut links: Vec<Link> = Vec::new();
        let mut sources: Vec<SourceInfo> = Vec::new();

        // Register one source for an output of a node.
        fn present_source(nodes: &mut [Node], sources: &mut Vec<SourceInfo>, node: usize, output: usize) {
            nodes[node].sources.push(sources.len());
            sources.push(SourceInfo {
                node,
                output,
                uses: 0,
            });
        }

        // Wire a consuming link from `source_index` into `node`. Both ends
        // record their position within the peer's adjacency list, so the
        // graph can be traversed in either direction without searching.
        fn wire(
            nodes: &mut [Node],
            links: &mut Vec<Link>,
            sources: &mut [SourceInfo],
            node: usize,
            source_index: usize,
            kind: LinkKind,
        ) {
            sources[source_index].uses += 1;
            let up_node = sources[source_index].node;
            let link_index = links.len();
            links.push(Link {
                kind,
                ends: [
                    LinkEnd {
                        node: up_node,
                        pos: nodes[up_node].links[DOWNSTREAM].len(),
                    },
                    LinkEnd {
                        node,
                        pos: nodes[node].links[UPSTREAM].len(),
                    },
                ],
                upstream_output: sources[source_index].output,
            });
            nodes[up_node].links[DOWNSTREAM].push(link_index);
            nodes[node].links[UPSTREAM].push(link_index);
        }

        let mut life3_seen = 0usize;
        for (constant_index, &value) in self.constant_values.iter().enumerate() {
            check_range("constant value", value as i64, 0, CONSTANT_VALUE_LIMIT as i64)?;
            let node_index = constant_index;
            nodes[node_index].kind = NodeKind::Constant;
            if value == LIFE3_VALUE {
                life3_seen += 1;
            }
            present_source(&mut nodes, &mut sources, node_index, 0);
        }
        if life3_seen != 1 {
            return Err(DesignError::MarkerConstant { found: life3_seen });
        }

        for (input_index, &slot) in self.input_storage_slots.iter().enumerate() {
            let node_index = constant_count + input_index;
            nodes[node_index].kind = NodeKind::Input;
            check_range("input storage slot", slot as i64, 0, self.storage_slots as i64)?;
            present_source(&mut nodes, &mut sources, node_index, 0);
        }

        for (composite_index, composite) in self.composites.iter().enumerate() {
            let node_index = constant_count + input_count + composite_index;
            match composite {
                CompositeSpec::Select(select) => {
                    nodes[node_index].kind = NodeKind::Select;
                    let stage_count = select.stage_sources.len();
                    let lane_count = select.lanes.len();
                    check_range("select lane count", lane_count as i64, 1, RANGE_LIMIT)?;
                    check_range("select stage count", stage_count as i64, 2, RANGE_LIMIT)?;
                    check_range(
                        "select stage tmp count",
                        select.stage_tmps.len() as i64,
                        stage_count as i64 - 1,
                        stage_count as i64,
                    )?;
                    let needed = stage_count + lane_count * 2;
                    check_range("select work slots", needed as i64, 1, self.work_slots as i64 + 1)?;
                    nodes[node_index].work_slots_needed = needed;
                    for &(nonzero, zero) in &select.lanes {
                        check_range("select nonzero source", nonzero as i64, 0, sources.len() as i64)?;
                        check_range("select zero source", zero as i64, 0, sources.len() as i64)?;
                        wire(&mut nodes, &mut links, &mut sources, node_index, nonzero, LinkKind::ToSelectNonzero);
                        wire(&mut nodes, &mut links, &mut sources, node_index, zero, LinkKind::ToSelectZero);
                    }
                    for (stage_index, &source) in select.stage_sources.iter().enumerate() {
                        if stage_index > 0 {
                            let tmp = select.stage_tmps[stage_index - 1];
                            check_range("select stage tmp", tmp as i64, 0, TMP_COUNT as i64)?;
                            nodes[node_index].tmps.push(tmp);
                        }
                        check_range("select stage source", source as i64, 0, sources.len() as i64)?;
                        wire(&mut nodes, &mut links, &mut sources, node_index, source, LinkKind::ToBinary);
                    }
                    for lane_index in 0..lane_count {
                        present_source(&mut nodes, &mut sources, node_index, lane_index);
                    }
                }
                CompositeSpec::Binary(binary) => {
                    nodes[node_index].kind = NodeKind::Binary;
                    check_range("binary tmp", binary.tmp as i64, 0, TMP_COUNT as i64)?;
                    check_range("binary rhs source", binary.rhs_source as i64, 0, sources.len() as i64)?;
                    check_range("binary lhs source", binary.lhs_source as i64, 0, sources.len() as i64)?;
                    nodes[node_index].tmps.push(binary.tmp);
                    wire(&mut nodes, &mut links, &mut sources, node_index, binary.rhs_source, LinkKind::ToBinary);
                    wire(&mut nodes, &mut links, &mut sources, node_index, binary.lhs_source, LinkKind::ToBinary);
                    nodes[node_index].work_slots_needed = 2;
                    present_source(&mut nodes, &mut sources, node_index, 0);
                }
            }
        }

        let mut output_links = Vec::with_capacity(output_count);
        for (output_index, output) in self.outputs.iter().enumerate() {
            let node_index = constant_count + input_count + composite_count + output_index;
            check_range("output source", output.source as i64, 0, sources.len() as i64)?;
            check_range("output storage slot", output.storage_slot as i64, 0, self.storage_slots as i64)?;
            nodes[node_index].kind = NodeKind::Output;
            wire(&mut nodes, &mut links, &mut sources, node_index, output.source, LinkKind::ToOutput);
            output_links.push(OutputLink {
                source: output.source,
                storage_slot: output.storage_slot,
            });
        }

        for &slot in &self.clobber_storage_slots {
            check_range("clobber storage slot", slot as i64, 0, self.storage_slots as i64)?;
        }

        Ok(Design {
            work_slots: self.work_slots,
            storage_slots: self.storage_slots,
            storage_slot_overhead_penalty: self.storage_slot_overhead_penalty,
            constant_count,
            input_count,
            composite_count,
            output_count,
            nodes,
            links,
            constant_values: self.constant_values,
            input_storage_slots: self.input_storage_slots,
            clobber_storage_slots: self.clobber_storage_slots,
            output_links,
            sources,
        })
    }
}

/// Result of a successful layer legality check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LayerCheck {
    /// Work slots the layer occupies after same-layer hand-through savings.
    pub work_slots: usize,
}

impl Design {
    /// Work slot budget of the target.
    pub fn work_slots(&self) -> usize {
        self.work_slots
    }

    /// Storage slot budget of the target.
    pub fn storage_slots(&self) -> usize {
        self.storage_slots
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Decide whether an ordered candidate layer is legal, and if so how many
    /// work slots it occupies.
    ///
    /// Node order *between* layers is assumed correct; order violations
    /// within the layer are detected here. Any of the following makes the
    /// layer illegal:
    ///
    /// - a select anywhere but the last position;
    /// - a same-layer binary link whose consumer is not the immediately
    ///   following entry, or that targets the lhs parameter of a
    ///   non-commutative operator, or any parameter past the lhs;
    /// - more than one same-layer binary link out of one producer;
    /// - any same-layer select-nonzero link;
    /// - a work slot total above the design budget.
    ///
    /// Same-layer binary and select-zero links hand the producer's value
    /// straight through without a reload, each saving one work slot.
    pub(crate) fn check_layer(&self, node_indices: &[usize]) -> Option<LayerCheck> {
        let Some((_, all_but_last)) = node_indices.split_last() else {
            return Some(LayerCheck { work_slots: 0 });
        };
        for &node_index in all_but_last {
            if self.nodes[node_index].kind == NodeKind::Select {
                // select somewhere other than at the end
                return None;
            }
        }
        let mut work_slots: i64 = 0;
        let position_in_layer =
            |node_index: usize| node_indices.iter().position(|&candidate| candidate == node_index);
        for (layer_pos, &node_index) in node_indices.iter().enumerate() {
            let node = &self.nodes[node_index];
            work_slots += node.work_slots_needed as i64;
            let mut same_layer_binary_links = 0;
            for &link_index in &node.links[DOWNSTREAM] {
                let link = &self.links[link_index];
                let linked_node_index = link.ends[DOWNSTREAM].node;
                let linked_node = &self.nodes[linked_node_index];
                let Some(linked_pos) = position_in_layer(linked_node_index) else {
                    continue;
                };
                if link.kind == LinkKind::ToBinary {
                    if linked_pos != layer_pos + 1 {
                        // binary same-layer link with non-adjacent node
                        return None;
                    }
                    let mut lhs_index = 1;
                    if linked_node.kind == NodeKind::Select {
                        lhs_index += linked_node.sources.len() * 2;
                    }
                    if link.ends[DOWNSTREAM].pos == lhs_index && !TMP_COMMUTATIVE[linked_node.tmps[0]] {
                        // binary same-layer link to lhs of non-commutative node
                        return None;
                    }
                    if link.ends[DOWNSTREAM].pos > lhs_index {
                        // binary same-layer link past the lhs parameter
                        return None;
                    }
                    same_layer_binary_links += 1;
                    if same_layer_binary_links > 1 {
                        return None;
                    }
                }
                if link.kind == LinkKind::ToSelectNonzero {
                    return None;
                }
                if link.kind == LinkKind::ToBinary || link.kind == LinkKind::ToSelectZero {
                    // this saves a load
                    work_slots -= 1;
                }
            }
        }
        if work_slots <= self.work_slots as i64 {
            return Some(LayerCheck {
                work_slots: work_slots.max(0) as usize,
            });
        }
        // needs too many work slots
        None
    }
}
