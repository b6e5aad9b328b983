//! Compute graph reconstruction.
//!
//! A graph request carries a flat array of descriptors and the ids of its
//! output nodes. Tensors reference each other by id through `src` and
//! `view_src`; the builder resolves those references into arena indices,
//! depth-first from each node, with an explicit stack so that deep chains
//! cannot exhaust the thread stack.
//!
//! The arena is filled in post-order, so every tensor sits after all of its
//! sources and executing the arena front to back respects dependencies.

use crate::protocol::{GraphComputeReq, WireTensor, MAX_SRC};
use crate::tensor::Tensor;
use crate::{Result, RpcError};
use std::collections::{HashMap, HashSet};

/// Slot index used for `view_src` while walking a descriptor's references.
const VIEW_SLOT: usize = MAX_SRC;

#[derive(Debug, Clone, Copy)]
enum Mark {
    Visiting,
    Done(usize),
}

/// A validated graph whose tensors are stored in dependency order.
#[derive(Debug, Default)]
pub struct ComputeGraph {
    tensors: Vec<Tensor>,
    nodes: Vec<usize>,
}

impl ComputeGraph {
    /// Build a graph from a decoded request.
    ///
    /// `deserialize` turns one descriptor into a tensor. It receives the
    /// already-built `view_src` tensor, if the descriptor has one; the builder
    /// then fills in `src` and `view_src` links itself.
    ///
    /// Fails on duplicate ids, references to ids absent from the array,
    /// cycles, and views whose source is declared later in the array.
    pub fn build<F>(request: &GraphComputeReq, mut deserialize: F) -> Result<Self>
    where
        F: FnMut(&WireTensor, Option<&Tensor>) -> Result<Tensor>,
    {
        let mut positions: HashMap<u64, usize> = HashMap::with_capacity(request.tensors.len());
        for (pos, wire) in request.tensors.iter().enumerate() {
            if wire.id == 0 {
                continue;
            }
            if positions.insert(wire.id, pos).is_some() {
                return Err(RpcError::DuplicateTensor(wire.id));
            }
        }

        let mut graph = ComputeGraph::default();
        let mut marks: HashMap<u64, Mark> = HashMap::with_capacity(positions.len());
        let mut seen_nodes = HashSet::new();

        for &root in &request.nodes {
            if root == 0 {
                continue;
            }
            let index = graph.resolve(root, request, &positions, &mut marks, &mut deserialize)?;
            if seen_nodes.insert(index) {
                graph.nodes.push(index);
            }
        }

        Ok(graph)
    }

    fn resolve<F>(
        &mut self,
        root: u64,
        request: &GraphComputeReq,
        positions: &HashMap<u64, usize>,
        marks: &mut HashMap<u64, Mark>,
        deserialize: &mut F,
    ) -> Result<usize>
    where
        F: FnMut(&WireTensor, Option<&Tensor>) -> Result<Tensor>,
    {
        if let Some(Mark::Done(index)) = marks.get(&root) {
            return Ok(*index);
        }
        if !positions.contains_key(&root) {
            return Err(RpcError::UnknownTensor(root));
        }

        // (id, next reference slot to visit)
        let mut stack: Vec<(u64, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::Visiting);

        while let Some(&(id, slot)) = stack.last() {
            let pos = positions[&id];
            let wire = &request.tensors[pos];

            if slot <= VIEW_SLOT {
                let top = stack.len() - 1;
                stack[top].1 += 1;

                let child = if slot == VIEW_SLOT {
                    wire.view_src
                } else {
                    wire.src[slot]
                };
                if child == 0 {
                    continue;
                }
                let child_pos = *positions
                    .get(&child)
                    .ok_or(RpcError::UnknownTensor(child))?;
                if slot == VIEW_SLOT && child_pos >= pos {
                    return Err(RpcError::ForwardViewReference { id, view_src: child });
                }
                match marks.get(&child) {
                    Some(Mark::Visiting) => return Err(RpcError::GraphCycle(child)),
                    Some(Mark::Done(_)) => {}
                    None => {
                        marks.insert(child, Mark::Visiting);
                        stack.push((child, 0));
                    }
                }
                continue;
            }

            // Every reference is built; build this tensor.
            stack.pop();
            let view_src = self.built(marks, wire.view_src);
            let mut tensor = deserialize(wire, view_src.map(|i| &self.tensors[i]))?;
            for (link, child) in tensor.src.iter_mut().zip(wire.src) {
                *link = self.built(marks, child);
            }
            tensor.view_src = view_src;

            let index = self.tensors.len();
            self.tensors.push(tensor);
            marks.insert(id, Mark::Done(index));
        }

        match marks.get(&root) {
            Some(Mark::Done(index)) => Ok(*index),
            _ => Err(RpcError::UnknownTensor(root)),
        }
    }

    fn built(&self, marks: &HashMap<u64, Mark>, id: u64) -> Option<usize> {
        match marks.get(&id) {
            Some(Mark::Done(index)) if id != 0 => Some(*index),
            _ => None,
        }
    }

    /// All tensors reachable from the output nodes, sources first.
    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.tensors.get(index)
    }

    /// The output nodes, in request order.
    pub fn nodes(&self) -> impl Iterator<Item = &Tensor> + '_ {
        self.nodes.iter().map(|i| &self.tensors[*i])
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}
