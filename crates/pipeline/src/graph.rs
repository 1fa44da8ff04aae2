//! Operator-level dependency graph and level computation.
//!
//! A [`Pipeline`] is flattened into one node per [`OpRef`]. Edges from the
//! initial-input sentinel carry data but no ordering; several edges between
//! the same ordered pair of ops count as a single dependency.

use std::collections::{BTreeMap, BTreeSet};

use crate::{Edge, OpId, OpRef, Pipeline, PipelineError, Step};

/// One flattened operator usage.
#[derive(Debug)]
struct GraphNode<'p> {
    op: &'p OpRef,
    step: &'p Step,
    position: usize,
    upstream: BTreeSet<OpId>,
    dependents: BTreeSet<OpId>,
    incoming: Vec<&'p Edge>,
}

/// The operator DAG induced by a pipeline's steps and edges.
///
/// Construction validates that op ids are unique and that every edge endpoint
/// resolves; cycles are detected by [`OperatorGraph::levels`].
#[derive(Debug)]
pub struct OperatorGraph<'p> {
    order: Vec<OpId>,
    nodes: BTreeMap<OpId, GraphNode<'p>>,
}

impl<'p> OperatorGraph<'p> {
    /// Flattens `pipeline` into an operator graph.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::DuplicateOpId`] if two OpRefs share an id.
    /// - [`PipelineError::DanglingEdge`] if an edge names an undeclared op.
    pub fn build(pipeline: &'p Pipeline) -> Result<Self, PipelineError> {
        let mut order = Vec::new();
        let mut nodes: BTreeMap<OpId, GraphNode<'p>> = BTreeMap::new();

        for (step, op) in pipeline.op_refs() {
            if let Some(existing) = nodes.get(&op.id) {
                return Err(PipelineError::DuplicateOpId {
                    op_id: op.id.clone(),
                    first_step: existing.step.key.clone(),
                    second_step: step.key.clone(),
                });
            }
            nodes.insert(
                op.id.clone(),
                GraphNode {
                    op,
                    step,
                    position: order.len(),
                    upstream: BTreeSet::new(),
                    dependents: BTreeSet::new(),
                    incoming: Vec::new(),
                },
            );
            order.push(op.id.clone());
        }

        for edge in &pipeline.edges {
            let target = nodes
                .get_mut(&edge.target_op)
                .ok_or_else(|| PipelineError::DanglingEdge {
                    edge: edge.id.clone(),
                    op_id: edge.target_op.clone(),
                })?;
            target.incoming.push(edge);

            if edge.is_from_initial_input() {
                continue;
            }
            target.upstream.insert(edge.source_op.clone());

            let source = nodes
                .get_mut(&edge.source_op)
                .ok_or_else(|| PipelineError::DanglingEdge {
                    edge: edge.id.clone(),
                    op_id: edge.source_op.clone(),
                })?;
            source.dependents.insert(edge.target_op.clone());
        }

        Ok(Self { order, nodes })
    }

    /// Number of operators in the graph.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if the pipeline declares no operators.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Op ids in step/declaration order.
    pub fn op_ids(&self) -> &[OpId] {
        &self.order
    }

    /// The OpRef declared under `op_id`.
    pub fn op_ref(&self, op_id: &OpId) -> Option<&'p OpRef> {
        self.nodes.get(op_id).map(|node| node.op)
    }

    /// The step enclosing `op_id`.
    pub fn step_of(&self, op_id: &OpId) -> Option<&'p Step> {
        self.nodes.get(op_id).map(|node| node.step)
    }

    /// Ops that feed data into `op_id` (the initial-input sentinel excluded).
    pub fn upstream(&self, op_id: &OpId) -> impl Iterator<Item = &OpId> {
        self.nodes
            .get(op_id)
            .into_iter()
            .flat_map(|node| node.upstream.iter())
    }

    /// Edges targeting `op_id`, in pipeline order.
    pub fn incoming_edges(&self, op_id: &OpId) -> &[&'p Edge] {
        self.nodes
            .get(op_id)
            .map(|node| node.incoming.as_slice())
            .unwrap_or_default()
    }

    /// Groups op ids into dependency levels (Kahn's algorithm).
    ///
    /// Operators in one level have no dependencies among themselves and every
    /// operator's level is strictly after the levels of all its upstream ops.
    /// Within a level ops keep their declaration order.
    ///
    /// # Errors
    ///
    /// [`PipelineError::CycleDetected`] if fewer operators than declared can
    /// be placed, i.e. the graph contains a cycle.
    pub fn levels(&self) -> Result<Vec<Vec<OpId>>, PipelineError> {
        let mut in_degree: BTreeMap<&OpId, usize> = self
            .nodes
            .iter()
            .map(|(id, node)| (id, node.upstream.len()))
            .collect();

        let mut levels: Vec<Vec<OpId>> = Vec::new();
        let mut queue: Vec<OpId> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id) == Some(&0))
            .cloned()
            .collect();

        while !queue.is_empty() {
            let mut next: Vec<OpId> = Vec::new();
            for id in &queue {
                let Some(node) = self.nodes.get(id) else {
                    continue;
                };
                for dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent.clone());
                        }
                    }
                }
            }
            next.sort_by_key(|id| self.nodes.get(id).map_or(usize::MAX, |node| node.position));
            levels.push(std::mem::replace(&mut queue, next));
        }

        let placed: usize = levels.iter().map(Vec::len).sum();
        if placed != self.order.len() {
            return Err(PipelineError::CycleDetected {
                placed,
                total: self.order.len(),
            });
        }
        Ok(levels)
    }
}

/// Convenience wrapper: builds the graph for `pipeline` and returns its levels.
///
/// # Errors
///
/// See [`OperatorGraph::build`] and [`OperatorGraph::levels`].
pub fn topological_levels(pipeline: &Pipeline) -> Result<Vec<Vec<OpId>>, PipelineError> {
    OperatorGraph::build(pipeline)?.levels()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EdgeId, OpRef, OperatorKey, PortKey, Step, StepKey};
    use proptest::prelude::*;

    fn op(id: &str) -> OpId {
        OpId::new(id).unwrap()
    }

    fn single_op_step(id: &str) -> Step {
        Step::new(
            StepKey::new(id).unwrap(),
            id,
            vec![OpRef::new(op(id), OperatorKey::new(id).unwrap())],
        )
    }

    fn edge(n: usize, from: &str, port: &str, to: &str) -> Edge {
        Edge::new(
            EdgeId::new(format!("e{n}")).unwrap(),
            op(from),
            PortKey::new(port).unwrap(),
            op(to),
            PortKey::new(port).unwrap(),
        )
    }

    fn pipeline(ops: &[&str], edges: &[(&str, &str, &str)]) -> Pipeline {
        Pipeline {
            id: None,
            name: "test".into(),
            description: String::new(),
            steps: ops.iter().map(|id| single_op_step(id)).collect(),
            edges: edges
                .iter()
                .enumerate()
                .map(|(n, (from, port, to))| edge(n, from, port, to))
                .collect(),
        }
    }

    fn names(levels: &[Vec<OpId>]) -> Vec<Vec<&str>> {
        levels
            .iter()
            .map(|level| level.iter().map(OpId::as_str).collect())
            .collect()
    }

    #[test]
    fn fan_out_from_fetch_gives_two_levels() {
        let p = pipeline(
            &["fetch", "summary", "notes"],
            &[
                ("__input__", "url", "fetch"),
                ("fetch", "text", "summary"),
                ("fetch", "text", "notes"),
            ],
        );
        let levels = topological_levels(&p).unwrap();
        assert_eq!(names(&levels), vec![vec!["fetch"], vec!["summary", "notes"]]);
    }

    #[test]
    fn parallel_edges_between_one_pair_count_once() {
        let p = pipeline(
            &["a", "b", "c"],
            &[
                ("a", "text", "b"),
                ("a", "pdf_bytes", "b"),
                ("b", "text", "c"),
                ("__input__", "url", "c"),
            ],
        );
        let graph = OperatorGraph::build(&p).unwrap();
        assert_eq!(graph.upstream(&op("b")).count(), 1);
        assert_eq!(graph.upstream(&op("c")).count(), 1);
        assert_eq!(graph.incoming_edges(&op("b")).len(), 2);
        assert_eq!(
            names(&graph.levels().unwrap()),
            vec![vec!["a"], vec!["b"], vec!["c"]]
        );
    }

    #[test]
    fn initial_input_edges_do_not_delay_an_op() {
        let p = pipeline(&["c"], &[("__input__", "url", "c")]);
        assert_eq!(names(&topological_levels(&p).unwrap()), vec![vec!["c"]]);
    }

    #[test]
    fn two_node_cycle_is_rejected() {
        let p = pipeline(&["a", "b"], &[("a", "x", "b"), ("b", "y", "a")]);
        let err = topological_levels(&p).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CycleDetected { placed: 0, total: 2 }
        ));
    }

    #[test]
    fn cycle_behind_a_valid_prefix_is_still_rejected() {
        let p = pipeline(
            &["root", "a", "b"],
            &[("root", "x", "a"), ("a", "x", "b"), ("b", "x", "a")],
        );
        let err = topological_levels(&p).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::CycleDetected { placed: 1, total: 3 }
        ));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let p = pipeline(&["a"], &[("a", "x", "a")]);
        assert!(topological_levels(&p).is_err());
    }

    #[test]
    fn duplicate_op_ids_are_rejected() {
        let p = pipeline(&["a", "a"], &[]);
        assert!(matches!(
            OperatorGraph::build(&p),
            Err(PipelineError::DuplicateOpId { .. })
        ));
    }

    #[test]
    fn edges_to_undeclared_ops_are_rejected() {
        let p = pipeline(&["a"], &[("a", "x", "ghost")]);
        match OperatorGraph::build(&p) {
            Err(PipelineError::DanglingEdge { op_id, .. }) => assert_eq!(op_id.as_str(), "ghost"),
            other => panic!("expected dangling edge, got {other:?}"),
        }
    }

    #[test]
    fn empty_pipeline_has_no_levels() {
        let p = pipeline(&[], &[]);
        assert!(topological_levels(&p).unwrap().is_empty());
    }

    /// Op count plus a forward-only edge set: `(source, target)` with
    /// `source < target`, so every generated graph is acyclic.
    fn forward_dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (1usize..12).prop_flat_map(|count| {
            let pairs: Vec<(usize, usize)> = (1..count)
                .flat_map(|target| (0..target).map(move |source| (source, target)))
                .collect();
            let slots = pairs.len();
            (
                Just(count),
                prop::collection::vec(any::<bool>(), slots).prop_map(move |keep| {
                    pairs
                        .iter()
                        .zip(keep)
                        .filter_map(|(pair, keep)| keep.then_some(*pair))
                        .collect::<Vec<_>>()
                }),
            )
        })
    }

    proptest! {
        #[test]
        fn levels_partition_ops_and_respect_dependencies((count, edges) in forward_dag()) {
            let ids: Vec<String> = (0..count).map(|i| format!("op{i}")).collect();
            let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
            let edge_refs: Vec<(&str, &str, &str)> = edges
                .iter()
                .map(|&(s, t)| (id_refs[s], "data", id_refs[t]))
                .collect();
            let p = pipeline(&id_refs, &edge_refs);

            let levels = topological_levels(&p).unwrap();
            let sizes: usize = levels.iter().map(Vec::len).sum();
            prop_assert_eq!(sizes, count);

            let level_of: BTreeMap<&str, usize> = levels
                .iter()
                .enumerate()
                .flat_map(|(n, level)| level.iter().map(move |id| (id.as_str(), n)))
                .collect();
            prop_assert_eq!(level_of.len(), count, "an op was placed twice");
            for &(source, target) in &edges {
                prop_assert!(
                    level_of[id_refs[target]] > level_of[id_refs[source]],
                    "{} must run after {}", id_refs[target], id_refs[source]
                );
            }
        }
    }
}
