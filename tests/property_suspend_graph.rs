//! Property-based tests for suspension classification.
//!
//! Classification is a monotone fixpoint over an explicit call graph, which
//! gives it clean algebraic properties to pin down:
//!
//! - the result is a consistent fixpoint: a callable is suspendable exactly
//!   when it is marked so or some callee is suspendable, and each call site
//!   mirrors its callee
//! - classification is idempotent
//! - sealing: re-classifying after adding edges either reproduces the same
//!   answer or fails loudly, never silently promotes a sealed callable
//! - an explicit non-suspendable marking that the graph would promote is a
//!   classification error, not a silent override

mod common;
use common::*;

use fibra::suspend::{Marking, SuspendGraph};
use proptest::prelude::*;

/// A random call graph over `n` callables without explicit pins. Edges go
/// from each callable to an arbitrary subset of the others, cycles included.
#[derive(Debug, Clone)]
struct RandomGraph {
    markings: Vec<Marking>,
    edges: Vec<Vec<usize>>,
}

fn random_graph() -> impl Strategy<Value = RandomGraph> {
    (2usize..10).prop_flat_map(|n| {
        let markings = proptest::collection::vec(
            prop_oneof![
                3 => Just(Marking::Derived),
                1 => Just(Marking::Suspendable),
            ],
            n,
        );
        let edges = proptest::collection::vec(
            proptest::collection::vec(0..n, 0..n),
            n,
        );
        (markings, edges).prop_map(|(markings, edges)| RandomGraph { markings, edges })
    })
}

fn name(i: usize) -> String {
    format!("callable_{i}")
}

fn build(graph_def: &RandomGraph) -> SuspendGraph {
    let mut graph = SuspendGraph::new();
    for (i, (marking, callees)) in graph_def.markings.iter().zip(&graph_def.edges).enumerate() {
        let callee_names: Vec<String> = callees.iter().map(|&c| name(c)).collect();
        let callee_refs: Vec<&str> = callee_names.iter().map(String::as_str).collect();
        graph.register(&name(i), *marking, &callee_refs);
    }
    graph
}

fn suspendable_set(graph: &SuspendGraph, n: usize) -> Vec<bool> {
    (0..n)
        .map(|i| {
            graph
                .descriptor_by_name(&name(i))
                .expect("descriptor missing")
                .is_suspendable()
        })
        .collect()
}

proptest! {
    #[test]
    fn classification_is_a_consistent_fixpoint(graph_def in random_graph()) {
        init_test_logging();
        let n = graph_def.markings.len();
        let mut graph = build(&graph_def);
        graph.classify().expect("graph without pins must classify");

        let suspendable = suspendable_set(&graph, n);
        for i in 0..n {
            let marked = graph_def.markings[i] == Marking::Suspendable;
            let via_callee = graph_def.edges[i].iter().any(|&c| suspendable[c]);
            prop_assert_eq!(
                suspendable[i],
                marked || via_callee,
                "callable {} disagrees with the fixpoint equation",
                i
            );

            let descriptor = graph.descriptor_by_name(&name(i)).expect("descriptor missing");
            prop_assert_eq!(descriptor.call_sites().len(), graph_def.edges[i].len());
            for (site, &callee) in descriptor.call_sites().iter().zip(&graph_def.edges[i]) {
                prop_assert_eq!(*site, suspendable[callee]);
            }
        }
    }

    #[test]
    fn classification_is_idempotent(graph_def in random_graph()) {
        init_test_logging();
        let n = graph_def.markings.len();
        let mut graph = build(&graph_def);
        graph.classify().expect("first classification failed");
        let first = suspendable_set(&graph, n);

        graph.classify().expect("re-classification failed");
        let second = suspendable_set(&graph, n);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn sealed_answers_never_change_silently(
        graph_def in random_graph(),
        from in 0usize..10,
        to in 0usize..10,
    ) {
        init_test_logging();
        let n = graph_def.markings.len();
        let (from, to) = (from % n, to % n);
        let mut graph = build(&graph_def);
        graph.classify().expect("first classification failed");
        let before = suspendable_set(&graph, n);

        // Re-register `from` with one extra edge; edges only ever promote.
        let mut callees = graph_def.edges[from].clone();
        callees.push(to);
        let callee_names: Vec<String> = callees.iter().map(|&c| name(c)).collect();
        let callee_refs: Vec<&str> = callee_names.iter().map(String::as_str).collect();
        graph.register(&name(from), graph_def.markings[from], &callee_refs);

        match graph.classify() {
            Ok(()) => {
                // Accepted: the answer must be exactly what was sealed.
                prop_assert_eq!(before, suspendable_set(&graph, n));
            }
            Err(_) => {
                // Rejected: only a real promotion of a sealed callable
                // justifies the error.
                prop_assert!(
                    !before[from] && suspendable_via(&graph_def, from, to),
                    "spurious classification error"
                );
            }
        }
    }
}

/// Whether adding the edge `from -> to` would make `from` suspendable in
/// `graph_def`, computed against an independent fixpoint.
fn suspendable_via(graph_def: &RandomGraph, from: usize, to: usize) -> bool {
    let n = graph_def.markings.len();
    let mut edges = graph_def.edges.clone();
    edges[from].push(to);
    let mut suspendable: Vec<bool> = graph_def
        .markings
        .iter()
        .map(|m| *m == Marking::Suspendable)
        .collect();
    let mut changed = true;
    while changed {
        changed = false;
        for i in 0..n {
            if !suspendable[i] && edges[i].iter().any(|&c| suspendable[c]) {
                suspendable[i] = true;
                changed = true;
            }
        }
    }
    suspendable[from]
}

#[test]
fn pinned_callable_with_suspendable_callee_is_rejected() {
    init_test("pinned_callable_with_suspendable_callee_is_rejected");

    let mut graph = SuspendGraph::new();
    graph.register("park", Marking::Suspendable, &[]);
    graph.register("hot_path", Marking::NonSuspendable, &["park"]);

    let err = graph.classify().expect_err("promotion of a pin must fail");
    let text = err.to_string();
    assert_with_log!(
        text.contains("hot_path"),
        "error names the conflicting callable",
        "hot_path",
        text
    );

    test_complete!("pinned_callable_with_suspendable_callee_is_rejected");
}
