//! Time-domain graph properties: topological execution over randomized DAGs,
//! same-tick visibility inside a domain, last-sample visibility across
//! domains, and cycle handling.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::prelude::*;
use takt_core::control::blocks::{Constant, Gain};
use takt_core::control::{
    Block, BlockError, GraphError, Input, InputPort, Output, OutputPort, TimeDomain,
};
use takt_core::time::Timestamp;

/// Records its execution into a shared log; one input per upstream probe.
struct Probe {
    name: String,
    inputs: Vec<Input<f64>>,
    out: Output<f64>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Probe {
    fn new(name: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            out: Output::new(),
            log,
        }
    }

    fn add_source(&mut self, out: &Output<f64>) {
        let mut input = Input::new();
        input.connect(out).unwrap();
        self.inputs.push(input);
    }

    fn out(&self) -> &Output<f64> {
        &self.out
    }
}

impl Block for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&mut self) -> Vec<&mut dyn InputPort> {
        self.inputs
            .iter_mut()
            .map(|input| input as &mut dyn InputPort)
            .collect()
    }

    fn outputs(&self) -> Vec<&dyn OutputPort> {
        vec![&self.out]
    }

    fn run(&mut self, now: Timestamp) -> Result<(), BlockError> {
        let mut acc = 0.0;
        for (idx, input) in self.inputs.iter().enumerate() {
            let sig = input
                .signal()
                .ok_or_else(|| BlockError::unconnected(&self.name, &format!("in{idx}")))?;
            acc += sig.value;
        }
        self.log.lock().push(self.name.clone());
        self.out.set(acc + 1.0, now);
        Ok(())
    }
}

/// Build a random DAG of `n` probes: edge i→j with the given probability for
/// every i < j. Returns the probes and the edge list.
fn random_dag(
    n: usize,
    edge_probability: f64,
    rng: &mut StdRng,
    log: &Arc<Mutex<Vec<String>>>,
) -> (Vec<Arc<Mutex<Probe>>>, Vec<(usize, usize)>) {
    let probes: Vec<_> = (0..n)
        .map(|i| Arc::new(Mutex::new(Probe::new(format!("b{i}"), log.clone()))))
        .collect();

    let mut edges = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            if rng.gen_bool(edge_probability) {
                let upstream = probes[i].lock();
                probes[j].lock().add_source(upstream.out());
                edges.push((i, j));
            }
        }
    }
    (probes, edges)
}

#[test]
fn execution_order_is_topological_over_random_dags() {
    for seed in 0..25u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = rng.gen_range(3..12);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (probes, edges) = random_dag(n, 0.35, &mut rng, &log);

        // Insertion order must not matter: shuffle before adding.
        let mut insertion: Vec<usize> = (0..n).collect();
        insertion.shuffle(&mut rng);

        let mut td = TimeDomain::new("random", 0.001);
        for &idx in &insertion {
            td.add(probes[idx].clone()).unwrap();
        }
        td.freeze().unwrap();
        td.tick(Timestamp::from_nanos(1)).unwrap();

        let order = log.lock().clone();
        assert_eq!(order.len(), n, "seed {seed}: every block runs exactly once");
        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(pos, name)| (name.as_str(), pos))
            .collect();
        for &(i, j) in &edges {
            let pi = position[format!("b{i}").as_str()];
            let pj = position[format!("b{j}").as_str()];
            assert!(
                pi < pj,
                "seed {seed}: edge b{i}→b{j} violated (positions {pi} vs {pj})"
            );
        }
    }
}

#[test]
fn every_tick_runs_each_block_exactly_once() {
    let mut rng = StdRng::seed_from_u64(99);
    let log = Arc::new(Mutex::new(Vec::new()));
    let (probes, _) = random_dag(6, 0.4, &mut rng, &log);

    let mut td = TimeDomain::new("td", 0.001);
    for probe in &probes {
        td.add(probe.clone()).unwrap();
    }
    td.freeze().unwrap();

    for tick in 1..=10u64 {
        td.tick(Timestamp::from_nanos(tick)).unwrap();
        assert_eq!(log.lock().len(), 6 * tick as usize);
    }
}

#[test]
fn same_tick_visibility_within_a_domain() {
    let source = Arc::new(Mutex::new(Constant::new("source", 42.0)));
    let gain = Arc::new(Mutex::new(Gain::new("gain", 2.0)));
    gain.lock().input().connect(source.lock().out()).unwrap();

    let mut td = TimeDomain::new("td", 0.001);
    // Consumer first: the frozen order, not insertion order, decides.
    td.add(gain.clone()).unwrap();
    td.add(source.clone()).unwrap();
    td.freeze().unwrap();

    td.tick(Timestamp::from_nanos(1)).unwrap();
    assert_eq!(gain.lock().out().signal().value, 84.0);

    // A value written at tick n is read at tick n downstream.
    source.lock().set(43.0);
    td.tick(Timestamp::from_nanos(2)).unwrap();
    assert_eq!(gain.lock().out().signal().value, 86.0);
}

#[test]
fn cross_domain_reads_see_last_sample() {
    let source = Arc::new(Mutex::new(Constant::new("source", 1.0)));
    let gain = Arc::new(Mutex::new(Gain::new("gain", 1.0)));
    gain.lock().input().connect(source.lock().out()).unwrap();

    let mut td1 = TimeDomain::new("td1", 0.001);
    td1.add(source.clone()).unwrap();
    let mut td2 = TimeDomain::new("td2", 0.002);
    td2.add(gain.clone()).unwrap();
    td1.freeze().unwrap();
    td2.freeze().unwrap();

    td1.tick(Timestamp::from_nanos(1)).unwrap();
    source.lock().set(2.0);

    // td1 has not ticked the new value yet: td2 reads the last commit.
    td2.tick(Timestamp::from_nanos(2)).unwrap();
    assert_eq!(gain.lock().out().signal().value, 1.0);
    assert_eq!(
        gain.lock().out().signal().timestamp,
        Timestamp::from_nanos(1)
    );

    // After td1's next tick the new value becomes visible.
    td1.tick(Timestamp::from_nanos(3)).unwrap();
    td2.tick(Timestamp::from_nanos(4)).unwrap();
    assert_eq!(gain.lock().out().signal().value, 2.0);
}

#[test]
fn random_back_edge_makes_freeze_fail_without_partial_state() {
    for seed in 0..10u64 {
        let mut rng = StdRng::seed_from_u64(1000 + seed);
        let n = rng.gen_range(3..8);
        let log = Arc::new(Mutex::new(Vec::new()));
        let (probes, edges) = random_dag(n, 0.5, &mut rng, &log);
        if edges.is_empty() {
            continue;
        }

        // Close a random forward edge into a cycle.
        let &(i, j) = edges.choose(&mut rng).unwrap();
        {
            let downstream = probes[j].lock();
            probes[i].lock().add_source(downstream.out());
        }

        let mut td = TimeDomain::new("cyclic", 0.001);
        for probe in &probes {
            td.add(probe.clone()).unwrap();
        }
        assert!(
            matches!(td.freeze(), Err(GraphError::CycleDetected { .. })),
            "seed {seed}: cycle b{j}→b{i} must be detected"
        );
        assert!(!td.is_frozen(), "seed {seed}: no partial freeze state");
        // The domain is still mutable after the failed freeze.
        let extra = Arc::new(Mutex::new(Probe::new("extra", log.clone())));
        td.add(extra).unwrap();
    }
}
