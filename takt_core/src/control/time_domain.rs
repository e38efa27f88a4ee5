//! An ordered set of blocks executed atomically at a fixed period.
//!
//! Blocks are added during setup; [`TimeDomain::freeze`] computes the
//! topological execution order from the Input→Output wiring and seals every
//! port. [`TimeDomain::tick`] then runs the blocks in that order, all of them
//! observing the same tick timestamp.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::control::block::{BlockError, SharedBlock};
use crate::control::signal::SignalId;
use crate::time::Timestamp;

/// Structural error in the block graph. Fatal at executor start.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// The intra-domain dependency relation contains a cycle.
    #[error("cycle detected in time domain '{domain}' involving block '{block}'")]
    CycleDetected { domain: String, block: String },

    /// A block in the domain has an unwired input.
    #[error("block '{block}' in time domain '{domain}' has an unconnected input")]
    DanglingInput { domain: String, block: String },

    /// Structural mutation attempted after freeze.
    #[error("time domain '{domain}' is frozen")]
    FrozenDomain { domain: String },

    /// Re-wiring attempted on a port whose domain already froze.
    #[error("port is sealed; its time domain is frozen")]
    SealedPort,
}

/// An ordered sequence of blocks plus a period.
pub struct TimeDomain {
    name: String,
    period: f64,
    blocks: Vec<SharedBlock>,
    order: Vec<usize>,
    frozen: bool,
}

impl TimeDomain {
    /// New, empty domain with the given period [s].
    pub fn new(name: impl Into<String>, period: f64) -> Self {
        Self {
            name: name.into(),
            period,
            blocks: Vec::new(),
            order: Vec::new(),
            frozen: false,
        }
    }

    /// Domain name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution period [s].
    #[inline]
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Whether the execution order has been frozen.
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Number of contained blocks.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when no blocks are contained.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Append a block. Rejected after freeze.
    pub fn add(&mut self, block: SharedBlock) -> Result<(), GraphError> {
        if self.frozen {
            return Err(GraphError::FrozenDomain {
                domain: self.name.clone(),
            });
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Compute the topological execution order and seal every port.
    ///
    /// Edges to outputs outside the domain are allowed; they are read as
    /// last-sample values. On error no state changes: the domain stays
    /// unfrozen and blocks may still be added or re-wired.
    pub fn freeze(&mut self) -> Result<(), GraphError> {
        if self.frozen {
            return Ok(());
        }

        // Map every output cell produced inside this domain to its block.
        let mut producers: HashMap<SignalId, usize> = HashMap::new();
        for (idx, block) in self.blocks.iter().enumerate() {
            for out in block.lock().outputs() {
                producers.insert(out.id(), idx);
            }
        }

        // Build intra-domain edges and catch dangling inputs.
        let n = self.blocks.len();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indegree: Vec<usize> = vec![0; n];
        for (idx, block) in self.blocks.iter().enumerate() {
            let mut guard = block.lock();
            let block_name = guard.name().to_string();
            for input in guard.inputs() {
                let Some(source) = input.source_id() else {
                    return Err(GraphError::DanglingInput {
                        domain: self.name.clone(),
                        block: block_name,
                    });
                };
                if let Some(&producer) = producers.get(&source) {
                    successors[producer].push(idx);
                    indegree[idx] += 1;
                }
            }
        }

        // Kahn's algorithm, stable with respect to insertion order.
        let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        let mut cursor = 0;
        while cursor < ready.len() {
            let idx = ready[cursor];
            cursor += 1;
            order.push(idx);
            for &succ in &successors[idx] {
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    ready.push(succ);
                }
            }
        }

        if order.len() != n {
            let culprit = (0..n)
                .find(|&i| indegree[i] > 0)
                .expect("cycle implies a block with remaining indegree");
            return Err(GraphError::CycleDetected {
                domain: self.name.clone(),
                block: self.blocks[culprit].lock().name().to_string(),
            });
        }

        // Commit: seal all ports, then freeze.
        for block in &self.blocks {
            for input in block.lock().inputs() {
                input.seal();
            }
        }
        self.order = order;
        self.frozen = true;
        debug!(domain = %self.name, blocks = n, "time domain frozen");
        Ok(())
    }

    /// Run every block once, in frozen order.
    ///
    /// All blocks observe the same `now`. The first block error aborts the
    /// tick and is reported to the caller for fault conversion.
    pub fn tick(&mut self, now: Timestamp) -> Result<(), BlockError> {
        if !self.frozen {
            return Err(BlockError::runtime(&self.name, "domain ticked before freeze"));
        }
        for &idx in &self.order {
            self.blocks[idx].lock().run(now)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::control::blocks::{Constant, Gain, Sum};

    fn chain_domain() -> (Arc<Mutex<Constant<f64>>>, Arc<Mutex<Gain<f64>>>, TimeDomain) {
        let source = Arc::new(Mutex::new(Constant::new("source", 3.0)));
        let gain = Arc::new(Mutex::new(Gain::new("gain", 2.0)));
        gain.lock().input().connect(source.lock().out()).unwrap();

        let mut td = TimeDomain::new("td", 0.001);
        // Insert consumer first; the topological sort must reorder.
        td.add(gain.clone()).unwrap();
        td.add(source.clone()).unwrap();
        (source, gain, td)
    }

    #[test]
    fn freeze_orders_chain() {
        let (_source, gain, mut td) = chain_domain();
        td.freeze().unwrap();
        assert!(td.is_frozen());

        td.tick(Timestamp::from_nanos(100)).unwrap();
        let sig = gain.lock().out().signal();
        assert_eq!(sig.value, 6.0);
        assert_eq!(sig.timestamp, Timestamp::from_nanos(100));
    }

    #[test]
    fn add_after_freeze_rejected() {
        let (_source, _gain, mut td) = chain_domain();
        td.freeze().unwrap();

        let extra = Arc::new(Mutex::new(Constant::new("extra", 0.0)));
        assert!(matches!(
            td.add(extra),
            Err(GraphError::FrozenDomain { .. })
        ));
    }

    #[test]
    fn freeze_is_idempotent() {
        let (_source, _gain, mut td) = chain_domain();
        td.freeze().unwrap();
        td.freeze().unwrap();
    }

    #[test]
    fn dangling_input_detected() {
        let gain = Arc::new(Mutex::new(Gain::<f64>::new("gain", 2.0)));
        let mut td = TimeDomain::new("td", 0.001);
        td.add(gain).unwrap();
        assert!(matches!(
            td.freeze(),
            Err(GraphError::DanglingInput { .. })
        ));
        assert!(!td.is_frozen());
    }

    #[test]
    fn cycle_detected_without_partial_freeze() {
        // a and b feed each other through sum blocks.
        let a = Arc::new(Mutex::new(Sum::<1, f64>::new("a")));
        let b = Arc::new(Mutex::new(Sum::<1, f64>::new("b")));
        {
            let mut a_guard = a.lock();
            let b_guard = b.lock();
            a_guard.input(0).unwrap().connect(b_guard.out()).unwrap();
        }
        {
            let mut b_guard = b.lock();
            let a_guard = a.lock();
            b_guard.input(0).unwrap().connect(a_guard.out()).unwrap();
        }

        let mut td = TimeDomain::new("td", 0.001);
        td.add(a.clone()).unwrap();
        td.add(b.clone()).unwrap();
        assert!(matches!(
            td.freeze(),
            Err(GraphError::CycleDetected { .. })
        ));

        // No partial freeze state: still mutable, ports still re-wirable.
        assert!(!td.is_frozen());
        let extra = Arc::new(Mutex::new(Constant::new("extra", 1.0)));
        td.add(extra.clone()).unwrap();
        a.lock()
            .input(0)
            .unwrap()
            .connect(extra.lock().out())
            .unwrap();
        td.freeze().unwrap();
    }

    #[test]
    fn self_loop_is_a_cycle() {
        use crate::control::block::Block;
        use crate::control::signal::{Input, InputPort, Output, OutputPort};

        struct Loopy {
            input: Input<f64>,
            out: Output<f64>,
        }

        impl Loopy {
            fn new() -> Self {
                let out = Output::new();
                let mut input = Input::new();
                input.connect(&out).unwrap();
                Self { input, out }
            }
        }

        impl Block for Loopy {
            fn name(&self) -> &str {
                "loopy"
            }

            fn inputs(&mut self) -> Vec<&mut dyn InputPort> {
                vec![&mut self.input]
            }

            fn outputs(&self) -> Vec<&dyn OutputPort> {
                vec![&self.out]
            }

            fn run(&mut self, _now: Timestamp) -> Result<(), BlockError> {
                Ok(())
            }
        }

        let mut td = TimeDomain::new("td", 0.001);
        td.add(Arc::new(Mutex::new(Loopy::new()))).unwrap();
        assert!(matches!(
            td.freeze(),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn tick_before_freeze_fails() {
        let (_source, _gain, mut td) = chain_domain();
        assert!(td.tick(Timestamp::ZERO).is_err());
    }

    #[test]
    fn cross_domain_edge_is_not_dangling() {
        let source = Arc::new(Mutex::new(Constant::new("source", 1.0)));
        let gain = Arc::new(Mutex::new(Gain::new("gain", 10.0)));
        gain.lock().input().connect(source.lock().out()).unwrap();

        // Producer lives in another domain; the edge is read last-sample.
        let mut td_a = TimeDomain::new("a", 0.001);
        td_a.add(source).unwrap();
        let mut td_b = TimeDomain::new("b", 0.001);
        td_b.add(gain).unwrap();

        td_a.freeze().unwrap();
        td_b.freeze().unwrap();
    }
}
