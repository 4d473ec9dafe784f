//! CLI driver: read a design on stdin, anneal, print the plan on stdout.
//!
//! Progress (temperature plus the state diagram) streams to stderr once per
//! second while the optimizer runs. Exit codes: 0 on success, 1 when plan
//! assembly fails after annealing, 2 when the input does not parse.

use std::io::stdin;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use layerloom::{read_design, DispatchParameters, Optimizer, OptimizerState};

const DEFAULT_ITERATION_COUNT: usize = 100_000;
const DEFAULT_TEMPERATURE_INITIAL: f64 = 1.0;
const DEFAULT_TEMPERATURE_FINAL: f64 = 0.95;
const DEFAULT_TEMPERATURE_LOSS: f64 = 1e-7;

/// Machine-readable summary written by `--report`.
#[derive(Serialize)]
struct OptimizeReport {
    linear: f64,
    storage_slot_count: usize,
    part_count: i32,
    transitions: usize,
    plan_cost: i32,
    stack_count: usize,
}

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == key {
            return iter.next().cloned();
        }
    }
    None
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let threads = parse_flag(&args, "--threads")
        .and_then(|value| value.parse().ok())
        .unwrap_or_else(num_cpus::get);
    let seed = parse_flag(&args, "--seed")
        .and_then(|value| value.parse().ok())
        .unwrap_or_else(|| rand::rng().random());
    let iteration_count = parse_flag(&args, "--iterations")
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_ITERATION_COUNT);
    let temperature_initial = parse_flag(&args, "--t0")
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_TEMPERATURE_INITIAL);
    let temperature_final = parse_flag(&args, "--tmin")
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_TEMPERATURE_FINAL);
    let temperature_loss = parse_flag(&args, "--dt")
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_TEMPERATURE_LOSS);
    let quiet = args.iter().any(|arg| arg == "--quiet");
    let report_path = parse_flag(&args, "--report");

    let design = match read_design(stdin()) {
        Ok(design) => Arc::new(design),
        Err(err) => {
            eprintln!("failed to parse input: {err}");
            return ExitCode::from(2);
        }
    };

    let mut optimizer = Optimizer::new(
        seed,
        threads,
        OptimizerState {
            state: Arc::new(design.initial()),
            temperature: temperature_initial,
        },
    );
    if !quiet {
        eprint!("{}", optimizer.peek_state().state);
    }
    optimizer
        .dispatch(DispatchParameters {
            iteration_count,
            temperature_final,
            temperature_loss,
        })
        .expect("freshly created optimizer is idle");
    while !optimizer.ready() {
        if !quiet {
            let ostate = optimizer.peek_state();
            eprintln!("temperature: {}", ostate.temperature);
            eprint!("{}", ostate.state);
        }
        thread::sleep(Duration::from_secs(1));
    }
    optimizer.wait();
    let ostate = optimizer.peek_state();
    eprintln!("final temperature: {}", ostate.temperature);
    if !quiet {
        eprint!("{}", ostate.state);
    }

    let schedule = ostate.state.schedule();
    let plan = match schedule.to_plan() {
        Ok(plan) => plan,
        Err(err) => {
            eprintln!("design parameters not satisfied, no plan generated: {err}");
            return ExitCode::from(1);
        }
    };
    print!("{plan}");

    if let Some(path) = report_path {
        let energy = schedule.energy();
        let report = OptimizeReport {
            linear: energy.linear,
            storage_slot_count: energy.storage_slot_count,
            part_count: energy.part_count,
            transitions: ostate.state.iteration(),
            plan_cost: plan.cost,
            stack_count: plan.stack_count,
        };
        let json = serde_json::to_string_pretty(&report).expect("report serializes");
        if let Err(err) = std::fs::write(&path, json) {
            eprintln!("failed to write report to {path}: {err}");
            return ExitCode::from(1);
        }
    }
    ExitCode::SUCCESS
}
