//! Human-readable diagram of an evaluated state.
//!
//! `Display for State` draws one row pair per intermediate layer: the top
//! row shows which source occupies each storage slot and what each work slot
//! loads (`slot/tmp->source`, or `slot/tmp>>source` for a cheap re-load),
//! the bottom row shows remaining uses per slot (`__C` for constants), mode
//! triggers (`*`), and stores (`->slot`, conditional `>>slot`). The CLI
//! streams this to stderr while the optimizer runs.

use std::fmt;

use crate::energy::StepKind;
use crate::state::State;

#[derive(Clone, Copy, Default)]
struct SlotView {
    source: usize,
    /// Remaining uses; -1 marks a constant, which never releases.
    uses_left: i64,
}

#[derive(Clone, Copy, Default)]
struct WorkView {
    triggered_mode: bool,
    tmp: usize,
    loaded_from: Option<usize>,
    cloaded_from: Option<usize>,
    stored_to: Option<usize>,
    cstored_to: Option<usize>,
    node: Option<usize>,
}

fn track_storage(kind: &StepKind, slots: &mut [SlotView]) {
    match *kind {
        StepKind::AllocStorage {
            source,
            storage_slot,
            uses,
        } => {
            slots[storage_slot] = SlotView {
                source,
                uses_left: uses.map_or(-1, |uses| uses as i64),
            };
        }
        StepKind::UseStorage { storage_slot } => {
            if slots[storage_slot].uses_left > 0 {
                slots[storage_slot].uses_left -= 1;
            }
        }
        _ => {}
    }
}

fn emit_slots_top(f: &mut fmt::Formatter<'_>, slots: &[SlotView]) -> fmt::Result {
    write!(f, "|")?;
    for slot in slots {
        if slot.uses_left != 0 {
            write!(f, "{:03}", slot.source)?;
        } else {
            write!(f, "   ")?;
        }
        write!(f, "|")?;
    }
    Ok(())
}

fn emit_slots_bottom(f: &mut fmt::Formatter<'_>, slots: &[SlotView]) -> fmt::Result {
    write!(f, "|")?;
    for slot in slots {
        if slot.uses_left == -1 {
            write!(f, "__C")?;
        } else if slot.uses_left > 0 {
            write!(f, "{:_>3}", slot.uses_left)?;
        } else {
            write!(f, "___")?;
        }
        write!(f, "|")?;
    }
    Ok(())
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schedule = self.schedule();
        let energy = schedule.energy();
        let design = self.design();
        writeln!(f, " >>> successful transitions: {}", self.iteration())?;
        write!(f, " >>>     storage slot count: {}", energy.storage_slot_count)?;
        let mut show_storage_slots = design.storage_slots();
        if energy.storage_slot_count > design.storage_slots() {
            show_storage_slots = energy.storage_slot_count;
            write!(f, " (above the desired {})", design.storage_slots())?;
        }
        writeln!(f)?;
        writeln!(f, " >>>         particle count: {}", energy.part_count)?;
        write!(f, " ")?;
        for _ in 0..show_storage_slots {
            write!(f, "___ ")?;
        }
        write!(f, "  ")?;
        for _ in 0..design.work_slots() {
            write!(f, "_________ ")?;
        }
        writeln!(f)?;

        let mut slots = vec![SlotView::default(); show_storage_slots];
        let mut steps = schedule.steps().iter();
        for step in steps.by_ref() {
            if step.kind == StepKind::Commit {
                break;
            }
            track_storage(&step.kind, &mut slots);
        }
        for _ in 1..self.layers().len() - 1 {
            let snapshot = slots.clone();
            let mut work = vec![WorkView::default(); design.work_slots()];
            for step in steps.by_ref() {
                match step.kind {
                    StepKind::Commit => break,
                    StepKind::Load {
                        node,
                        tmp,
                        work_slot,
                        storage_slot,
                    } => {
                        work[work_slot].tmp = tmp;
                        work[work_slot].loaded_from = Some(storage_slot);
                        work[work_slot].node = node;
                    }
                    StepKind::Cload {
                        node,
                        tmp,
                        work_slot,
                        storage_slot,
                    } => {
                        work[work_slot].tmp = tmp;
                        work[work_slot].cloaded_from = Some(storage_slot);
                        work[work_slot].node = node;
                    }
                    StepKind::Store {
                        work_slot,
                        storage_slot,
                    } => work[work_slot].stored_to = Some(storage_slot),
                    StepKind::Cstore {
                        work_slot,
                        storage_slot,
                    } => work[work_slot].cstored_to = Some(storage_slot),
                    StepKind::Mode { work_slot, .. } => work[work_slot].triggered_mode = true,
                    _ => {}
                }
                track_storage(&step.kind, &mut slots);
            }
            emit_slots_top(f, &snapshot)?;
            write!(f, " |")?;
            for view in &work {
                if let Some(node) = view.node {
                    if let Some(from) = view.cloaded_from {
                        write!(f, "{:02}/{:X}>>", from, view.tmp)?;
                    }
                    if let Some(from) = view.loaded_from {
                        write!(f, "{:02}/{:X}->", from, view.tmp)?;
                    }
                    write!(f, "{:03}", design.nodes[node].sources[0])?;
                } else {
                    write!(f, "         ")?;
                }
                write!(f, "|")?;
            }
            writeln!(f)?;
            emit_slots_bottom(f, &snapshot)?;
            write!(f, " |")?;
            for view in &work {
                if view.node.is_some() {
                    write!(f, "{}", if view.triggered_mode { "*" } else { "_" })?;
                    if let Some(to) = view.cstored_to {
                        write!(f, ">>{to:02}")?;
                    } else {
                        write!(f, "____")?;
                    }
                    if let Some(to) = view.stored_to {
                        write!(f, "->{to:02}")?;
                    } else {
                        write!(f, "____")?;
                    }
                } else {
                    write!(f, "_________")?;
                }
                write!(f, "|")?;
            }
            writeln!(f)?;
        }
        emit_slots_top(f, &slots)?;
        writeln!(f)?;
        emit_slots_bottom(f, &slots)?;
        writeln!(f)?;
        writeln!(f)?;
        writeln!(f)
    }
}
