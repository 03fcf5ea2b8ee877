//! Bounded fan-out of many runnables.
//!
//! Nodes live in an arena (root at index 0). Every node holds at most
//! `batch_size` slots, a slot being either a direct runnable or a child
//! node. Running a batch dispatches each direct runnable and each child
//! subtree as its own async process, so one invocation never makes more than
//! `batch_size` outbound calls.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use shipq_core::{ProcessId, QueueResult};

use super::starter::AsyncProcessStarter;
use super::Runnable;

const MIN_BATCH_SIZE: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchNode {
    pub runnables: Vec<Runnable>,
    pub children: Vec<usize>,
}

impl BatchNode {
    fn slots(&self) -> usize {
        self.runnables.len() + self.children.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncBatchStarter {
    batch_size: usize,
    nodes: Vec<BatchNode>,
}

impl AsyncBatchStarter {
    /// Sizes below two cannot branch and are raised to two.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(MIN_BATCH_SIZE),
            nodes: vec![BatchNode::default()],
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn nodes(&self) -> &[BatchNode] {
        &self.nodes
    }

    pub fn add(&mut self, runnable: Runnable) {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.slots() < self.batch_size) {
            node.runnables.push(runnable);
            return;
        }

        // Every node is full: push one runnable down into a fresh child.
        let Some(parent) = self.nodes.iter().position(|n| !n.runnables.is_empty()) else {
            return;
        };
        let moved = self.nodes[parent].runnables.remove(0);
        let child = self.nodes.len();
        self.nodes.push(BatchNode {
            runnables: vec![moved, runnable],
            children: Vec::new(),
        });
        self.nodes[parent].children.push(child);
    }

    pub fn extend(&mut self, runnables: impl IntoIterator<Item = Runnable>) {
        for runnable in runnables {
            self.add(runnable);
        }
    }

    /// Total number of runnables in the whole tree.
    pub fn len(&self) -> usize {
        self.nodes.iter().map(|n| n.runnables.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the subtree rooted at `index`, re-indexed so that it is a
    /// standalone batch.
    pub fn subtree(&self, index: usize) -> AsyncBatchStarter {
        let mut nodes = Vec::new();
        let mut pending = VecDeque::from([(index, None::<usize>)]);

        while let Some((source, parent)) = pending.pop_front() {
            let Some(node) = self.nodes.get(source) else {
                continue;
            };
            let target = nodes.len();
            nodes.push(BatchNode {
                runnables: node.runnables.clone(),
                children: Vec::new(),
            });
            if let Some(parent) = parent {
                let parent_node: &mut BatchNode = &mut nodes[parent];
                parent_node.children.push(target);
            }
            pending.extend(node.children.iter().map(|&c| (c, Some(target))));
        }

        if nodes.is_empty() {
            nodes.push(BatchNode::default());
        }
        AsyncBatchStarter {
            batch_size: self.batch_size,
            nodes,
        }
    }

    /// Levels in the tree; a lone root has depth 1.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut level = vec![0usize];
        while !level.is_empty() {
            depth += 1;
            level = level
                .iter()
                .filter_map(|&i| self.nodes.get(i))
                .flat_map(|n| n.children.iter().copied())
                .collect();
        }
        depth
    }

    /// Upper bound on the wall clock time until every leaf has been reached.
    pub fn wait_time(&self, request: Duration) -> Duration {
        let factor = u32::try_from(self.batch_size * self.depth()).unwrap_or(u32::MAX);
        request.saturating_mul(factor)
    }

    /// Dispatch the root's children as sub-batches and its runnables
    /// directly. Returns the guid of every process started.
    pub fn run(&self, starter: &AsyncProcessStarter) -> QueueResult<Vec<ProcessId>> {
        let Some(root) = self.nodes.first() else {
            return Ok(Vec::new());
        };

        let mut started = Vec::with_capacity(root.slots());
        for &child in &root.children {
            started.push(starter.start(Runnable::Batch(self.subtree(child)))?);
        }
        for runnable in &root.runnables {
            started.push(starter.start(runnable.clone())?);
        }
        Ok(started)
    }
}
