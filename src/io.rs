//! Textual formats: the design input and the plan output.
//!
//! The design format is a flat stream of whitespace-separated integers (and
//! one real, the storage overhead penalty), in the fixed order documented on
//! [`parse_design`]. The plan format is line-oriented: a header with the
//! stack count, step count and total cost, then one `stackIndex tag
//! [operand ...]` line per step, where `tag` is [`PlanOp::tag`]. Both
//! directions round-trip exactly.

use std::fmt;
use std::io::Read;
use std::str::SplitWhitespace;

use crate::design::{
    check_range, BinarySpec, CompositeSpec, Design, DesignSpec, OutputSpec, SelectSpec, RANGE_LIMIT,
    TMP_COUNT,
};
use crate::error::ParseError;
use crate::plan::{Plan, PlanOp, PlanStep};

struct Tokens<'a> {
    iter: SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Tokens {
            iter: text.split_whitespace(),
        }
    }

    fn next_token(&mut self) -> Result<&'a str, ParseError> {
        self.iter.next().ok_or(ParseError::UnexpectedEnd)
    }

    fn next_usize(&mut self) -> Result<usize, ParseError> {
        let token = self.next_token()?;
        token.parse().map_err(|_| ParseError::BadToken {
            token: token.to_string(),
            expected: "a non-negative integer",
        })
    }

    fn next_i32(&mut self) -> Result<i32, ParseError> {
        let token = self.next_token()?;
        token.parse().map_err(|_| ParseError::BadToken {
            token: token.to_string(),
            expected: "an integer",
        })
    }

    fn next_f64(&mut self) -> Result<f64, ParseError> {
        let token = self.next_token()?;
        token.parse().map_err(|_| ParseError::BadToken {
            token: token.to_string(),
            expected: "a real number",
        })
    }
}

/// Parse a design from its textual form.
///
/// Token order:
///
/// ```text
/// workSlots storageSlots storageSlotOverheadPenalty
/// constantCount inputCount compositeCount outputCount clobberCount
/// constant[..C]
/// inputStorageSlot[..I]
/// per composite:
///   tmp                          (tmp == TMP_COUNT introduces a select)
///   select: laneCount stageCount
///           (nonzeroSource zeroSource) x laneCount
///           source[0] (tmp source) x (stageCount-1)
///   binary: rhsSource lhsSource
/// (sourceIndex storageSlot) x O
/// clobberStorageSlot[..K]
/// ```
pub fn parse_design(text: &str) -> Result<Design, ParseError> {
    let mut tokens = Tokens::new(text);
    let mut spec = DesignSpec {
        work_slots: tokens.next_usize()?,
        storage_slots: tokens.next_usize()?,
        storage_slot_overhead_penalty: tokens.next_f64()?,
        ..DesignSpec::default()
    };
    let constant_count = tokens.next_usize()?;
    let input_count = tokens.next_usize()?;
    let composite_count = tokens.next_usize()?;
    let output_count = tokens.next_usize()?;
    let clobber_count = tokens.next_usize()?;
    check_range("constant count", constant_count as i64, 0, RANGE_LIMIT)?;
    check_range("input count", input_count as i64, 0, RANGE_LIMIT)?;
    check_range("composite count", composite_count as i64, 0, RANGE_LIMIT)?;
    check_range("output count", output_count as i64, 0, RANGE_LIMIT)?;
    check_range("clobber count", clobber_count as i64, 0, RANGE_LIMIT)?;
    for _ in 0..constant_count {
        spec.constant_values.push(tokens.next_i32()?);
    }
    for _ in 0..input_count {
        spec.input_storage_slots.push(tokens.next_usize()?);
    }
    for _ in 0..composite_count {
        let tmp = tokens.next_usize()?;
        check_range("composite tmp", tmp as i64, 0, TMP_COUNT as i64 + 1)?;
        if tmp == TMP_COUNT {
            let lane_count = tokens.next_usize()?;
            let stage_count = tokens.next_usize()?;
            check_range("select lane count", lane_count as i64, 1, RANGE_LIMIT)?;
            check_range("select stage count", stage_count as i64, 2, RANGE_LIMIT)?;
            let mut select = SelectSpec {
                lanes: Vec::with_capacity(lane_count),
                stage_sources: Vec::with_capacity(stage_count),
                stage_tmps: Vec::with_capacity(stage_count - 1),
            };
            for _ in 0..lane_count {
                let nonzero = tokens.next_usize()?;
                let zero = tokens.next_usize()?;
                select.lanes.push((nonzero, zero));
            }
            for stage in 0..stage_count {
                if stage > 0 {
                    select.stage_tmps.push(tokens.next_usize()?);
                }
                select.stage_sources.push(tokens.next_usize()?);
            }
            spec.composites.push(CompositeSpec::Select(select));
        } else {
            let rhs_source = tokens.next_usize()?;
            let lhs_source = tokens.next_usize()?;
            spec.composites.push(CompositeSpec::Binary(BinarySpec {
                tmp,
                rhs_source,
                lhs_source,
            }));
        }
    }
    for _ in 0..output_count {
        let source = tokens.next_usize()?;
        let storage_slot = tokens.next_usize()?;
        spec.outputs.push(OutputSpec {
            source,
            storage_slot,
        });
    }
    for _ in 0..clobber_count {
        spec.clobber_storage_slots.push(tokens.next_usize()?);
    }
    Ok(spec.build()?)
}

/// Read a design from any reader (typically stdin or a file).
pub fn read_design(mut reader: impl Read) -> Result<Design, ParseError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    parse_design(&text)
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} {}", self.stack_count, self.steps.len(), self.cost)?;
        for step in &self.steps {
            write!(f, "{} {}", step.stack, step.op.tag())?;
            match step.op {
                PlanOp::Load {
                    work_slot,
                    storage_slot,
                }
                | PlanOp::Store {
                    work_slot,
                    storage_slot,
                }
                | PlanOp::Cstore {
                    work_slot,
                    storage_slot,
                } => write!(f, " {work_slot} {storage_slot}")?,
                PlanOp::Cload { work_slot } | PlanOp::Lfilt { work_slot } => {
                    write!(f, " {work_slot}")?
                }
                PlanOp::Mode { tmp } => write!(f, " {tmp}")?,
                PlanOp::Lcap { life3_index } => write!(f, " {life3_index}")?,
                PlanOp::Rfilt {
                    storage_slot,
                    constant_value,
                } => write!(f, " {storage_slot} {constant_value}")?,
                PlanOp::Aray
                | PlanOp::East
                | PlanOp::West
                | PlanOp::Clear
                | PlanOp::Top
                | PlanOp::Bottom => {}
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl Plan {
    /// Parse a plan from the text format emitted by [`Plan`]'s `Display`.
    pub fn parse(text: &str) -> Result<Plan, ParseError> {
        let mut tokens = Tokens::new(text);
        let stack_count = tokens.next_usize()?;
        let step_count = tokens.next_usize()?;
        let cost = tokens.next_i32()?;
        let mut steps = Vec::new();
        for _ in 0..step_count {
            let stack = tokens.next_usize()?;
            let tag = tokens.next_usize()?;
            let op = match tag {
                0 => PlanOp::Load {
                    work_slot: tokens.next_usize()?,
                    storage_slot: tokens.next_usize()?,
                },
                1 => PlanOp::Cload {
                    work_slot: tokens.next_usize()?,
                },
                2 => PlanOp::Mode {
                    tmp: tokens.next_usize()?,
                },
                3 => PlanOp::Store {
                    work_slot: tokens.next_usize()?,
                    storage_slot: tokens.next_usize()?,
                },
                4 => PlanOp::Cstore {
                    work_slot: tokens.next_usize()?,
                    storage_slot: tokens.next_usize()?,
                },
                5 => PlanOp::Aray,
                6 => PlanOp::East,
                7 => PlanOp::West,
                8 => PlanOp::Clear,
                9 => PlanOp::Top,
                10 => PlanOp::Bottom,
                11 => PlanOp::Lcap {
                    life3_index: tokens.next_usize()?,
                },
                12 => PlanOp::Lfilt {
                    work_slot: tokens.next_usize()?,
                },
                13 => PlanOp::Rfilt {
                    storage_slot: tokens.next_usize()?,
                    constant_value: tokens.next_i32()?,
                },
                _ => return Err(ParseError::UnknownStepTag { tag: tag as i64 }),
            };
            steps.push(PlanStep { stack, op });
        }
        Ok(Plan {
            steps,
            cost,
            stack_count,
        })
    }
}
