//! The energy evaluator: from a layering to a micro-operation schedule.
//!
//! [`State::energy`] runs a deterministic pass over the layering, tracking a
//! storage arena with use-counting and constant-pinning, and sums the
//! particle cost of every load, mode change, store, and layer commit the
//! target would execute. [`State::schedule`] runs the same pass while also
//! recording the ordered micro-events, which the plan assembler consumes.
//!
//! The pass gathers events in traversal order and then stably sorts them by
//! `(layer, layer order, tie-break)`; the tie-break tables fix the exact
//! wire order the target demands, so two evaluations of the same state
//! always produce the same schedule.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::design::{Design, LinkKind, NodeKind, DOWNSTREAM, TMP_COUNT, UPSTREAM};
use crate::plan::{CLOAD_COST, COMMIT_COST, CSTORE_COST, LOAD_COST, MODE_COST, STORE_COST};
use crate::state::State;

/// Scalar evaluation of a state.
///
/// `linear` is what the annealer minimises: the particle count plus the
/// configured penalty for every storage slot allocated above budget.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Energy {
    pub linear: f64,
    pub storage_slot_count: usize,
    pub part_count: i32,
}

/// One micro-event gathered while evaluating a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    /// A constant placed into its storage slot before the first commit.
    Constant { storage_slot: usize, value: i32 },
    /// Layer boundary; the target advances persistent state.
    Commit,
    /// Fresh load of a storage slot into a work slot. `node` is absent for
    /// the synthetic output-remap layer.
    Load {
        node: Option<usize>,
        tmp: usize,
        work_slot: usize,
        storage_slot: usize,
    },
    /// Cheap re-load of a slot already loaded under the same tmp this layer.
    Cload {
        node: Option<usize>,
        tmp: usize,
        work_slot: usize,
        storage_slot: usize,
    },
    /// First use of an operator tag in this layer.
    Mode { work_slot: usize, tmp: usize },
    Store {
        work_slot: usize,
        storage_slot: usize,
    },
    Cstore {
        work_slot: usize,
        storage_slot: usize,
    },
    /// Arena bookkeeping, kept in the schedule for visualisation.
    AllocStorage {
        source: usize,
        storage_slot: usize,
        /// Downstream uses the slot starts with; `None` for constants,
        /// which are never released.
        uses: Option<usize>,
    },
    UseStorage { storage_slot: usize },
}

/// A micro-event tagged with the layer it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleStep {
    pub layer: usize,
    pub kind: StepKind,
}

impl StepKind {
    /// Fixed intra-layer ordering demanded by the target.
    pub(crate) fn layer_order(&self) -> u8 {
        match self {
            StepKind::Constant { .. }
            | StepKind::Load { .. }
            | StepKind::Cload { .. }
            | StepKind::Mode { .. } => 0,
            StepKind::Store { .. } | StepKind::Cstore { .. } => 1,
            StepKind::UseStorage { .. } => 3,
            StepKind::AllocStorage { .. } => 4,
            StepKind::Commit => 5,
        }
    }
}

/// Ordered micro-operation schedule plus the energy it cost to produce.
///
/// Produced by [`State::schedule`]; feed it to
/// [`Schedule::to_plan`](crate::Schedule::to_plan) to obtain the
/// externalisable plan.
#[derive(Clone, Debug)]
pub struct Schedule {
    pub(crate) design: Arc<Design>,
    pub(crate) energy: Energy,
    pub(crate) steps: Vec<ScheduleStep>,
    pub(crate) output_remap_failed: bool,
}

impl Schedule {
    pub fn energy(&self) -> Energy {
        self.energy
    }

    /// The sorted micro-operation steps, exactly as the plan assembler and
    /// the diagram renderer consume them.
    pub fn steps(&self) -> &[ScheduleStep] {
        &self.steps
    }
}

/// Where gathered steps go: nowhere for plain energy queries, a vector when
/// the schedule itself is wanted. Keeping this a compile-time choice lets
/// the annealer's hot path skip all step bookkeeping.
trait StepSink {
    const ENABLED: bool;
    fn push(&mut self, layer: usize, kind: StepKind);
}

struct Discard;

impl StepSink for Discard {
    const ENABLED: bool = false;
    fn push(&mut self, _layer: usize, _kind: StepKind) {}
}

struct Collect {
    steps: Vec<ScheduleStep>,
}

impl StepSink for Collect {
    const ENABLED: bool = true;
    fn push(&mut self, layer: usize, kind: StepKind) {
        self.steps.push(ScheduleStep { layer, kind });
    }
}

/// Storage arena bookkeeping for one source.
#[derive(Clone, Debug, Default)]
struct StorageEntry {
    /// Slot currently holding the value; only read between alloc and the
    /// final use.
    slot: usize,
    /// Remaining downstream uses; `None` means infinite (constants).
    uses_left: Option<usize>,
    /// Storage slots pinned by output links referencing this source.
    output_pins: Vec<usize>,
}

#[derive(Clone, Copy, Debug)]
struct StoreEntry {
    source: usize,
    work_slot: Option<usize>,
    cwork_slot: Option<usize>,
}

struct TmpLoad {
    used: bool,
    slot_used: Vec<bool>,
}

struct Evaluator<'a, S: StepSink> {
    design: &'a Design,
    sink: &'a mut S,
    node_to_layer: Vec<usize>,
    part_count: i32,
    /// The arena: which source currently occupies each slot.
    slots: Vec<Option<usize>>,
    storage: Vec<StorageEntry>,
    disallow_constants: Vec<bool>,
    /// `(actual slot, pinned slot)` pairs to fix up in a final layer.
    output_remaps: Vec<(usize, usize)>,
    // per-layer scratch
    store_schedule: Vec<StoreEntry>,
    select_store_schedule: Vec<Option<usize>>,
    tmp_loads: Vec<TmpLoad>,
    work_slots_used: usize,
}

impl<'a, S: StepSink> Evaluator<'a, S> {
    fn new(design: &'a Design, node_to_layer: Vec<usize>, sink: &'a mut S) -> Self {
        let mut storage: Vec<StorageEntry> = vec![StorageEntry::default(); design.sources.len()];
        let mut disallow_constants = vec![false; design.storage_slots];
        for output_link in &design.output_links {
            storage[output_link.source].output_pins.push(output_link.storage_slot);
            disallow_constants[output_link.storage_slot] = true;
        }
        for &clobber_slot in &design.clobber_storage_slots {
            disallow_constants[clobber_slot] = true;
        }
        Evaluator {
            design,
            sink,
            node_to_layer,
            part_count: 0,
            slots: Vec::new(),
            storage,
            disallow_constants,
            output_remaps: Vec::new(),
            store_schedule: Vec::new(),
            select_store_schedule: Vec::new(),
            tmp_loads: Vec::new(),
            work_slots_used: 0,
        }
    }

    fn slot_free(&self, slot: usize) -> bool {
        self.slots.get(slot).is_none_or(|occupant| occupant.is_none())
    }

    /// Allocate a storage slot for a source. Preference order: a free slot
    /// pinned by one of the source's output links, then the caller-supplied
    /// slot (input pins), then the first free slot, then arena growth.
    /// Constants may never land in clobbered or output-pinned slots.
    fn alloc_storage(
        &mut self,
        layer: usize,
        source: usize,
        for_constant: bool,
        caller_slot: Option<usize>,
    ) -> usize {
        let mut chosen: Option<usize> = None;
        for &pin in &self.storage[source].output_pins {
            if chosen.is_none() && self.slot_free(pin) {
                chosen = Some(pin);
            }
        }
        if chosen.is_none() {
            chosen = caller_slot;
        }
        if let Some(slot) = chosen {
            if self.slots.len() < slot + 1 {
                self.slots.resize(slot + 1, None);
            }
        }
        let slot_ok = |slots: &[Option<usize>], disallow: &[bool], slot: usize| {
            slots[slot].is_none() && !(for_constant && slot < disallow.len() && disallow[slot])
        };
        if chosen.is_none() {
            chosen = (0..self.slots.len()).find(|&slot| slot_ok(&self.slots, &self.disallow_constants, slot));
        }
        let slot = loop {
            match chosen {
                Some(slot) => break slot,
                None => {
                    let try_next = self.slots.len();
                    self.slots.push(None);
                    if slot_ok(&self.slots, &self.disallow_constants, try_next) {
                        chosen = Some(try_next);
                    }
                }
            }
        };
        debug_assert!(self.slots[slot].is_none());
        self.slots[slot] = Some(source);
        for pin_index in 0..self.storage[source].output_pins.len() {
            let pin = self.storage[source].output_pins[pin_index];
            if pin != slot {
                self.output_remaps.push((slot, pin));
            }
        }
        let uses = if for_constant {
            None
        } else {
            Some(self.design.sources[source].uses)
        };
        self.storage[source].uses_left = uses;
        self.storage[source].slot = slot;
        if S::ENABLED {
            self.sink.push(
                layer,
                StepKind::AllocStorage {
                    source,
                    storage_slot: slot,
                    uses,
                },
            );
        }
        slot
    }

    /// Consume one use of a source, releasing its slot at zero. Constants
    /// are never released.
    fn use_storage(&mut self, layer: usize, source: usize) -> usize {
        let slot = self.storage[source].slot;
        if let Some(uses_left) = &mut self.storage[source].uses_left {
            debug_assert!(*uses_left > 0);
            *uses_left -= 1;
            if *uses_left == 0 {
                self.slots[slot] = None;
            }
        }
        if S::ENABLED {
            self.sink.push(layer, StepKind::UseStorage { storage_slot: slot });
        }
        slot
    }

    fn do_load(&mut self, layer: usize, node: Option<usize>, work_slot: usize, source: usize, tmp: usize) {
        let storage_slot = self.use_storage(layer, source);
        if !self.tmp_loads[tmp].used {
            self.part_count += MODE_COST;
            if S::ENABLED {
                self.sink.push(layer, StepKind::Mode { work_slot, tmp });
            }
            self.tmp_loads[tmp].used = true;
        }
        if self.tmp_loads[tmp].slot_used[storage_slot] {
            self.part_count += CLOAD_COST;
            if S::ENABLED {
                self.sink.push(
                    layer,
                    StepKind::Cload {
                        node,
                        tmp,
                        work_slot,
                        storage_slot,
                    },
                );
            }
        } else {
            self.tmp_loads[tmp].slot_used[storage_slot] = true;
            self.part_count += LOAD_COST;
            if S::ENABLED {
                self.sink.push(
                    layer,
                    StepKind::Load {
                        node,
                        tmp,
                        work_slot,
                        storage_slot,
                    },
                );
            }
        }
    }

    /// Reserve a store slot for a select lane's value, to be paired with a
    /// cheap conditional store out of the zero-branch work slot.
    fn do_cstore(&mut self, work_slot: usize, link_index: usize) {
        let link = &self.design.links[link_index];
        let select = &self.design.nodes[link.ends[DOWNSTREAM].node];
        let lane = (link.ends[DOWNSTREAM].pos - 1) / 2;
        let source = select.sources[lane];
        let schedule_index = self.store_schedule.len();
        self.store_schedule.push(StoreEntry {
            source,
            work_slot: None,
            cwork_slot: Some(work_slot),
        });
        self.select_store_schedule[lane] = Some(schedule_index);
    }

    /// Issue the load for one upstream link of a layer member, unless the
    /// producer sits in the same layer and hands its value through.
    fn do_link_upstream(&mut self, layer: usize, node_index: usize, link_pos: usize) {
        let design = self.design;
        let node = &design.nodes[node_index];
        let link_index = node.links[UPSTREAM][link_pos];
        let link = &design.links[link_index];
        let linked_node_index = link.ends[UPSTREAM].node;
        if self.node_to_layer[linked_node_index] == layer {
            return;
        }
        let mut load_tmp = 0;
        let mut stage_index = link_pos as isize;
        if node.kind == NodeKind::Select {
            stage_index -= node.sources.len() as isize * 2;
        }
        if link.kind == LinkKind::ToBinary && stage_index == 0 {
            // grab the next stage's tmp if the first stage's parameter
            // arrives from inside this layer
            let next_link = &design.links[node.links[UPSTREAM][link_pos + 1]];
            if self.node_to_layer[next_link.ends[UPSTREAM].node] == layer {
                stage_index += 1;
            }
        }
        if link.kind == LinkKind::ToBinary && stage_index > 0 {
            load_tmp = node.tmps[stage_index as usize - 1];
        }
        let source = design.nodes[linked_node_index].sources[link.upstream_output];
        let work_slot = self.work_slots_used;
        self.do_load(layer, Some(node_index), work_slot, source, load_tmp);
        self.work_slots_used += 1;
        if link.kind == LinkKind::ToSelectZero {
            self.do_cstore(self.work_slots_used - 1, link_index);
        }
    }

    fn run(&mut self, state: &State) -> (Energy, bool) {
        let design = self.design;

        for input_index in 0..design.input_count {
            let node_index = design.constant_count + input_index;
            let source = design.nodes[node_index].sources[0];
            self.alloc_storage(0, source, false, Some(design.input_storage_slots[input_index]));
        }
        for constant_index in 0..design.constant_count {
            let source = design.nodes[constant_index].sources[0];
            let storage_slot = self.alloc_storage(0, source, true, None);
            if S::ENABLED {
                self.sink.push(
                    0,
                    StepKind::Constant {
                        storage_slot,
                        value: design.constant_values[constant_index],
                    },
                );
            }
        }
        if S::ENABLED {
            self.sink.push(0, StepKind::Commit);
        }

        for layer in 1..state.layers.len() - 1 {
            let begin = state.layer_begins(layer);
            let end = state.layer_begins(layer + 1);
            self.store_schedule.clear();
            self.select_store_schedule.clear();
            self.tmp_loads = (0..TMP_COUNT)
                .map(|_| TmpLoad {
                    used: false,
                    slot_used: vec![false; self.slots.len()],
                })
                .collect();
            self.work_slots_used = 0;
            let last_node = &design.nodes[state.node_indices[end - 1]];
            if last_node.kind == NodeKind::Select {
                self.select_store_schedule.resize(last_node.sources.len(), None);
            }
            // zero-branch loads first so they don't get inserted between a
            // condition input and its same-layer source
            for &node_index in &state.node_indices[begin..end] {
                if design.nodes[node_index].kind == NodeKind::Select {
                    let lane_count = design.nodes[node_index].sources.len();
                    for lane in 0..lane_count {
                        self.do_link_upstream(layer, node_index, lane * 2 + 1);
                    }
                }
            }
            for &node_index in &state.node_indices[begin..end] {
                let node = &design.nodes[node_index];
                if node.kind == NodeKind::Select {
                    let stage_count = node.tmps.len() + 1;
                    let lane_count = node.sources.len();
                    for stage in 0..stage_count {
                        self.do_link_upstream(layer, node_index, lane_count * 2 + stage);
                    }
                    for lane in 0..lane_count {
                        self.do_link_upstream(layer, node_index, lane * 2);
                        let schedule_index = self.select_store_schedule[lane]
                            .expect("every select lane has a scheduled store by the time lanes are loaded");
                        self.store_schedule[schedule_index].work_slot = Some(self.work_slots_used - 1);
                    }
                } else {
                    for link_pos in 0..node.links[UPSTREAM].len() {
                        self.do_link_upstream(layer, node_index, link_pos);
                    }
                    let mut needs_store = false;
                    for &link_index in &node.links[DOWNSTREAM] {
                        let link = &design.links[link_index];
                        let linked_node_index = link.ends[DOWNSTREAM].node;
                        if self.node_to_layer[linked_node_index] != layer {
                            needs_store = true;
                        }
                        if self.node_to_layer[linked_node_index] == layer && link.kind == LinkKind::ToSelectZero {
                            self.do_cstore(self.work_slots_used - 1, link_index);
                        }
                    }
                    if needs_store {
                        self.store_schedule.push(StoreEntry {
                            source: node.sources[0],
                            work_slot: Some(self.work_slots_used - 1),
                            cwork_slot: None,
                        });
                    }
                }
            }
            for entry_index in 0..self.store_schedule.len() {
                let entry = self.store_schedule[entry_index];
                let storage_slot = self.alloc_storage(layer, entry.source, false, None);
                self.part_count += STORE_COST;
                if S::ENABLED {
                    self.sink.push(
                        layer,
                        StepKind::Store {
                            work_slot: entry.work_slot.expect("store work slot resolved"),
                            storage_slot,
                        },
                    );
                }
                if let Some(cwork_slot) = entry.cwork_slot {
                    self.part_count += CSTORE_COST;
                    if S::ENABLED {
                        self.sink.push(
                            layer,
                            StepKind::Cstore {
                                work_slot: cwork_slot,
                                storage_slot,
                            },
                        );
                    }
                }
            }
            self.part_count += COMMIT_COST;
            if S::ENABLED {
                self.sink.push(layer, StepKind::Commit);
            }
        }

        let storage_slot_count = self.slots.len();
        let storage_slot_overhead = storage_slot_count.saturating_sub(design.storage_slots);
        let energy = Energy {
            linear: f64::from(self.part_count)
                + storage_slot_overhead as f64 * design.storage_slot_overhead_penalty,
            storage_slot_count,
            part_count: self.part_count,
        };

        let mut output_remap_failed = false;
        if S::ENABLED {
            if self.output_remaps.len() > design.work_slots {
                output_remap_failed = true;
            } else if !self.output_remaps.is_empty() {
                // one synthetic fix-up layer moves every remapped value to
                // its pinned slot
                let layer = state.layers.len() - 1;
                self.sink.push(layer, StepKind::Mode { work_slot: 0, tmp: 0 });
                for (remap_index, &(from, to)) in self.output_remaps.iter().enumerate() {
                    self.sink.push(
                        layer,
                        StepKind::Load {
                            node: None,
                            tmp: 0,
                            work_slot: remap_index,
                            storage_slot: from,
                        },
                    );
                    self.sink.push(
                        layer,
                        StepKind::Store {
                            work_slot: remap_index,
                            storage_slot: to,
                        },
                    );
                }
                self.sink.push(layer, StepKind::Commit);
            }
        }
        (energy, output_remap_failed)
    }
}

fn load_group_key(kind: &StepKind) -> (i64, i64, i64, i64) {
    match *kind {
        StepKind::Load { tmp, storage_slot, .. } => (-(tmp as i64), 1, storage_slot as i64, 0),
        StepKind::Cload { tmp, storage_slot, .. } => (-(tmp as i64), 1, storage_slot as i64, 1),
        StepKind::Mode { tmp, .. } => (-(tmp as i64), 0, -1, -1),
        _ => (-1, -1, -1, -1),
    }
}

fn store_group_key(kind: &StepKind) -> (i64, i64) {
    match *kind {
        StepKind::Store { storage_slot, .. } => (storage_slot as i64, 1),
        StepKind::Cstore { storage_slot, .. } => (storage_slot as i64, 0),
        _ => (-1, -1),
    }
}

pub(crate) fn sort_steps(steps: &mut [ScheduleStep]) {
    steps.sort_by(|lhs, rhs| {
        let by_layer = lhs.layer.cmp(&rhs.layer);
        if by_layer != Ordering::Equal {
            return by_layer;
        }
        let lhs_order = lhs.kind.layer_order();
        let rhs_order = rhs.kind.layer_order();
        let by_order = lhs_order.cmp(&rhs_order);
        if by_order != Ordering::Equal {
            return by_order;
        }
        if lhs_order == 0 {
            let by_load = load_group_key(&lhs.kind).cmp(&load_group_key(&rhs.kind));
            if by_load != Ordering::Equal {
                return by_load;
            }
        }
        if lhs_order == 1 {
            let by_store = store_group_key(&lhs.kind).cmp(&store_group_key(&rhs.kind));
            if by_store != Ordering::Equal {
                return by_store;
            }
        }
        Ordering::Equal
    });
}

impl State {
    /// Evaluate this layering without recording the schedule. This is the
    /// annealer's hot path.
    pub fn energy(&self) -> Energy {
        let mut sink = Discard;
        let mut evaluator = Evaluator::new(&self.design, self.node_to_layer(), &mut sink);
        evaluator.run(self).0
    }

    /// Evaluate this layering and keep the ordered micro-operation schedule.
    pub fn schedule(&self) -> Schedule {
        let mut sink = Collect { steps: Vec::new() };
        let (energy, output_remap_failed) = {
            let mut evaluator = Evaluator::new(&self.design, self.node_to_layer(), &mut sink);
            evaluator.run(self)
        };
        let mut steps = sink.steps;
        sort_steps(&mut steps);
        Schedule {
            design: Arc::clone(&self.design),
            energy,
            steps,
            output_remap_failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::{
        BinarySpec, CompositeSpec, DesignSpec, OutputSpec, SelectSpec, LIFE3_VALUE,
    };

    fn single_binary() -> Arc<Design> {
        Arc::new(
            DesignSpec {
                work_slots: 2,
                storage_slots: 4,
                storage_slot_overhead_penalty: 1.0,
                constant_values: vec![LIFE3_VALUE],
                input_storage_slots: vec![2, 3],
                clobber_storage_slots: vec![],
                composites: vec![CompositeSpec::Binary(BinarySpec {
                    tmp: 0,
                    rhs_source: 1,
                    lhs_source: 2,
                })],
                outputs: vec![OutputSpec {
                    source: 3,
                    storage_slot: 0,
                }],
            }
            .build()
            .unwrap(),
        )
    }

    #[test]
    fn single_binary_costs_two_loads_one_mode_one_store() {
        let state = single_binary().initial();
        let energy = state.energy();
        // 2 loads + mode + store + commit
        assert_eq!(energy.part_count, 2 + 2 + 2 + 2 + 18);
        assert_eq!(energy.storage_slot_count, 4);
        assert_eq!(energy.linear, 26.0);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let state = single_binary().initial();
        let first = state.schedule();
        let second = state.schedule();
        assert_eq!(first.steps(), second.steps());
        assert_eq!(first.energy().part_count, second.energy().part_count);
    }

    fn chained_commutative() -> Arc<Design> {
        Arc::new(
            DesignSpec {
                work_slots: 3,
                storage_slots: 4,
                storage_slot_overhead_penalty: 1.0,
                constant_values: vec![LIFE3_VALUE],
                input_storage_slots: vec![2, 3],
                clobber_storage_slots: vec![],
                composites: vec![
                    CompositeSpec::Binary(BinarySpec {
                        tmp: 1,
                        rhs_source: 1,
                        lhs_source: 2,
                    }),
                    CompositeSpec::Binary(BinarySpec {
                        tmp: 1,
                        rhs_source: 3,
                        lhs_source: 1,
                    }),
                ],
                outputs: vec![OutputSpec {
                    source: 4,
                    storage_slot: 0,
                }],
            }
            .build()
            .unwrap(),
        )
    }

    #[test]
    fn merging_chained_binaries_saves_a_load_and_a_store() {
        let design = chained_commutative();
        let split = design.initial();
        assert_eq!(split.energy().part_count, 28 + 28);

        let merged = State {
            iteration: 0,
            design: Arc::clone(&design),
            node_indices: vec![0, 1, 2, 3, 4, 5],
            layers: vec![0, 3, 5],
        };
        assert!(design.check_layer(&[3, 4]).is_some());
        let energy = merged.energy();
        assert_eq!(energy.part_count, 30);
        assert!(energy.linear < split.energy().linear);
    }

    fn two_lane_select() -> Arc<Design> {
        Arc::new(
            DesignSpec {
                work_slots: 8,
                storage_slots: 8,
                storage_slot_overhead_penalty: 1.0,
                constant_values: vec![LIFE3_VALUE],
                input_storage_slots: vec![0, 1, 2, 3],
                clobber_storage_slots: vec![],
                composites: vec![CompositeSpec::Select(SelectSpec {
                    lanes: vec![(3, 4), (4, 3)],
                    stage_sources: vec![1, 2],
                    stage_tmps: vec![1],
                })],
                outputs: vec![
                    OutputSpec {
                        source: 5,
                        storage_slot: 4,
                    },
                    OutputSpec {
                        source: 6,
                        storage_slot: 5,
                    },
                ],
            }
            .build()
            .unwrap(),
        )
    }

    #[test]
    fn select_emits_lane_store_pairs_in_lane_order() {
        let state = two_lane_select().initial();
        let schedule = state.schedule();
        // lane stores land in the lanes' pinned output slots, conditional
        // store first within each pair
        let stores: Vec<StepKind> = schedule
            .steps()
            .iter()
            .filter(|step| step.kind.layer_order() == 1)
            .map(|step| step.kind)
            .collect();
        match stores.as_slice() {
            [StepKind::Cstore {
                storage_slot: first_c,
                ..
            }, StepKind::Store {
                storage_slot: first_s,
                ..
            }, StepKind::Cstore {
                storage_slot: second_c,
                ..
            }, StepKind::Store {
                storage_slot: second_s,
                ..
            }] => {
                assert_eq!((*first_c, *first_s), (4, 4));
                assert_eq!((*second_c, *second_s), (5, 5));
            }
            other => panic!("unexpected store sequence: {other:?}"),
        }
    }

    #[test]
    fn select_repeated_slot_loads_become_cloads() {
        let state = two_lane_select().initial();
        let schedule = state.schedule();
        let cloads = schedule
            .steps()
            .iter()
            .filter(|step| matches!(step.kind, StepKind::Cload { .. }))
            .count();
        // both lane sources are also zero-branch sources, so their second
        // loads under the same tmp are cheap
        assert_eq!(cloads, 2);
        // 2 modes, 4 loads, 2 cloads, 2 stores, 2 cstores, commit
        assert_eq!(state.energy().part_count, 4 + 8 + 2 + 4 + 2 + 18);
    }

    #[test]
    fn unpinned_result_slots_are_remapped_in_one_extra_layer() {
        // both outputs pin the same composite's value to two different slots
        let design = Arc::new(
            DesignSpec {
                work_slots: 2,
                storage_slots: 5,
                storage_slot_overhead_penalty: 1.0,
                constant_values: vec![LIFE3_VALUE],
                input_storage_slots: vec![2, 3],
                clobber_storage_slots: vec![0],
                composites: vec![CompositeSpec::Binary(BinarySpec {
                    tmp: 0,
                    rhs_source: 1,
                    lhs_source: 2,
                })],
                outputs: vec![
                    OutputSpec {
                        source: 3,
                        storage_slot: 0,
                    },
                    OutputSpec {
                        source: 3,
                        storage_slot: 1,
                    },
                ],
            }
            .build()
            .unwrap(),
        );
        let state = design.initial();
        let schedule = state.schedule();
        let commits = schedule
            .steps()
            .iter()
            .filter(|step| step.kind == StepKind::Commit)
            .count();
        // layer 0, the binary's layer, and exactly one remap layer
        assert_eq!(commits, 3);
        // the marker constant must avoid the clobbered and pinned slots
        let life3_slot = schedule.steps().iter().find_map(|step| match step.kind {
            StepKind::Constant {
                storage_slot,
                value,
            } if value == LIFE3_VALUE => Some(storage_slot),
            _ => None,
        });
        assert_eq!(life3_slot, Some(4));
    }
}
