//! Simulated annealing over layerings, single-pass and parallel.
//!
//! [`optimize_once`] runs one classic annealing loop: propose a random
//! neighbour, always accept improvements, accept regressions with
//! probability `exp(-dE / T)`, cool by a fixed loss per step.
//!
//! [`Optimizer`] wraps that loop in a fork-join worker pool. Each round the
//! driver snapshots the held `(state, temperature)` pair, hands the same
//! snapshot to every worker, joins them, keeps the lowest-energy result
//! (cooled to the first worker's ending temperature), and publishes it.
//! Rounds repeat until the published temperature reaches the dispatch's
//! final temperature or a cancel request arrives. Workers never share
//! mutable state: the design is shared read-only and each worker anneals
//! its own copy of the layering with its own seeded RNG.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::OptimizerError;
use crate::state::State;

/// Parameters for one [`optimize_once`] pass.
#[derive(Clone, Copy, Debug)]
pub struct OptimizeParameters {
    pub iteration_count: usize,
    pub temperature_initial: f64,
    pub temperature_final: f64,
    pub temperature_loss: f64,
}

/// Per-round parameters for [`Optimizer::dispatch`]; the initial temperature
/// comes from the held state instead.
#[derive(Clone, Copy, Debug)]
pub struct DispatchParameters {
    pub iteration_count: usize,
    pub temperature_final: f64,
    pub temperature_loss: f64,
}

/// The held pair an optimizer publishes after every round.
#[derive(Clone, Debug)]
pub struct OptimizerState {
    pub state: Arc<State>,
    pub temperature: f64,
}

fn transition_probability(energy: f64, new_energy: f64, temperature: f64) -> f64 {
    if new_energy < energy {
        return 1.0;
    }
    (-(new_energy - energy) / temperature).exp()
}

/// Run one annealing pass and return the resulting state with the
/// temperature it cooled to.
///
/// A pass with zero iterations (or an initial temperature already at or
/// below the final one) returns the input state unchanged.
pub fn optimize_once<R: Rng>(rng: &mut R, state: Arc<State>, params: OptimizeParameters) -> OptimizerState {
    let mut state = state;
    let mut temperature = params.temperature_initial;
    let mut iterations = 0;
    while iterations < params.iteration_count && temperature > params.temperature_final {
        let next = state.random_neighbour(rng);
        let linear = state.energy().linear;
        let next_linear = next.energy().linear;
        if transition_probability(linear, next_linear, temperature) >= rng.random::<f64>() {
            state = Arc::new(next);
        }
        temperature -= params.temperature_loss;
        iterations += 1;
    }
    OptimizerState { state, temperature }
}

struct WorkerInbox {
    working: bool,
    exit: bool,
    job: Option<OptimizerState>,
    result: Option<OptimizerState>,
}

struct WorkerShared {
    inbox: Mutex<WorkerInbox>,
    signal: Condvar,
}

/// One pool member: a thread parked on its inbox until the driver hands it
/// a snapshot to anneal.
struct Worker {
    shared: Arc<WorkerShared>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(seed: u64, dp: DispatchParameters) -> Worker {
        let shared = Arc::new(WorkerShared {
            inbox: Mutex::new(WorkerInbox {
                working: false,
                exit: false,
                job: None,
                result: None,
            }),
            signal: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(seed);
            loop {
                let job = {
                    let mut inbox = thread_shared.inbox.lock().unwrap();
                    loop {
                        if inbox.exit {
                            return;
                        }
                        if inbox.working {
                            break inbox.job.take().expect("job stored before working flag raised");
                        }
                        inbox = thread_shared.signal.wait(inbox).unwrap();
                    }
                };
                let result = optimize_once(
                    &mut rng,
                    Arc::clone(&job.state),
                    OptimizeParameters {
                        iteration_count: dp.iteration_count,
                        temperature_initial: job.temperature,
                        temperature_final: dp.temperature_final,
                        temperature_loss: dp.temperature_loss,
                    },
                );
                let mut inbox = thread_shared.inbox.lock().unwrap();
                inbox.result = Some(result);
                inbox.working = false;
                drop(inbox);
                thread_shared.signal.notify_all();
            }
        });
        Worker { shared, handle }
    }

    fn start(&self, job: OptimizerState) {
        let mut inbox = self.shared.inbox.lock().unwrap();
        inbox.job = Some(job);
        inbox.working = true;
        drop(inbox);
        self.shared.signal.notify_all();
    }

    fn finish(&self) -> OptimizerState {
        let mut inbox = self.shared.inbox.lock().unwrap();
        while inbox.working {
            inbox = self.shared.signal.wait(inbox).unwrap();
        }
        inbox
            .result
            .take()
            .expect("finished worker leaves its result in the inbox")
    }

    fn exit(self) {
        {
            let mut inbox = self.shared.inbox.lock().unwrap();
            inbox.exit = true;
        }
        self.shared.signal.notify_all();
        self.handle.join().expect("optimizer worker panicked");
    }
}

/// Parallel annealing driver.
///
/// The held `(state, temperature)` pair is observable at any time through
/// [`peek_state`](Optimizer::peek_state) and replaceable through
/// [`poke_state`](Optimizer::poke_state) while the optimizer is idle.
/// [`dispatch`](Optimizer::dispatch) is non-blocking; [`wait`](Optimizer::wait)
/// joins the driver, and [`cancel`](Optimizer::cancel) requests a stop at
/// the next round boundary and then joins.
pub struct Optimizer {
    dispatched: bool,
    cancel_request: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    held: Arc<RwLock<OptimizerState>>,
    driver: Option<JoinHandle<()>>,
    thread_count: usize,
    rng: StdRng,
}

impl Optimizer {
    /// Create an idle optimizer holding `initial`. Worker RNGs are derived
    /// from `seed`, so equal seeds with equal thread counts replay equal
    /// optimizations.
    pub fn new(seed: u64, thread_count: usize, initial: OptimizerState) -> Optimizer {
        Optimizer {
            dispatched: false,
            cancel_request: Arc::new(AtomicBool::new(false)),
            ready: Arc::new(AtomicBool::new(false)),
            held: Arc::new(RwLock::new(initial)),
            driver: None,
            thread_count: thread_count.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Start the driver thread. Fails if a dispatch is already in flight.
    pub fn dispatch(&mut self, dp: DispatchParameters) -> Result<(), OptimizerError> {
        if self.dispatched {
            return Err(OptimizerError::Dispatched);
        }
        self.ready.store(false, Ordering::SeqCst);
        self.cancel_request.store(false, Ordering::SeqCst);
        self.dispatched = true;
        let seeds: Vec<u64> = (0..self.thread_count).map(|_| self.rng.random()).collect();
        let held = Arc::clone(&self.held);
        let cancel_request = Arc::clone(&self.cancel_request);
        let ready = Arc::clone(&self.ready);
        self.driver = Some(thread::spawn(move || {
            let workers: Vec<Worker> = seeds
                .into_iter()
                .map(|seed| Worker::spawn(seed, dp))
                .collect();
            loop {
                let mut sample = held.read().unwrap().clone();
                if !(sample.temperature > dp.temperature_final) {
                    break;
                }
                for worker in &workers {
                    worker.start(sample.clone());
                }
                let results: Vec<OptimizerState> = workers.iter().map(Worker::finish).collect();
                if let Some(first) = results.first() {
                    sample.temperature = first.temperature;
                }
                let mut best = OrderedFloat(sample.state.energy().linear);
                for result in &results {
                    let linear = OrderedFloat(result.state.energy().linear);
                    if linear < best {
                        sample.state = Arc::clone(&result.state);
                        best = linear;
                    }
                }
                *held.write().unwrap() = sample;
                if cancel_request.load(Ordering::SeqCst) {
                    break;
                }
            }
            for worker in workers {
                worker.exit();
            }
            ready.store(true, Ordering::SeqCst);
        }));
        Ok(())
    }

    /// Join the driver if one is in flight. Always returns with the
    /// optimizer idle.
    pub fn wait(&mut self) {
        if let Some(handle) = self.driver.take() {
            handle.join().expect("optimizer driver panicked");
            self.dispatched = false;
        }
    }

    /// Request a stop at the next round boundary and join.
    pub fn cancel(&mut self) {
        self.cancel_request.store(true, Ordering::SeqCst);
        self.wait();
    }

    /// True once a dispatched driver has finished its rounds.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// True while a dispatch is in flight (until [`wait`](Optimizer::wait)).
    pub fn dispatched(&self) -> bool {
        self.dispatched
    }

    /// Snapshot the held state.
    pub fn peek_state(&self) -> OptimizerState {
        self.held.read().unwrap().clone()
    }

    /// Replace the held state. Rejected while dispatched, since the driver
    /// publishes into the same cell between rounds.
    pub fn poke_state(&mut self, new_state: OptimizerState) -> Result<(), OptimizerError> {
        if self.dispatched {
            return Err(OptimizerError::Dispatched);
        }
        *self.held.write().unwrap() = new_state;
        Ok(())
    }
}

impl Drop for Optimizer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn improvements_are_always_accepted() {
        assert_eq!(transition_probability(30.0, 26.0, 0.5), 1.0);
        assert_eq!(transition_probability(30.0, 29.999, 1e-12), 1.0);
    }

    #[test]
    fn regressions_decay_with_temperature() {
        let warm = transition_probability(26.0, 30.0, 1.0);
        let cold = transition_probability(26.0, 30.0, 0.1);
        assert!(warm > cold);
        assert!(warm < 1.0);
        assert!(cold > 0.0);
        assert_eq!(transition_probability(26.0, 30.0, 1.0), (-4.0f64).exp());
    }
}
