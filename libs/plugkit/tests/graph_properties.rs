use plugkit::DependencyGraph;
use proptest::prelude::*;

fn graph_of(n: usize, edges: &[(usize, usize)]) -> DependencyGraph<usize, usize> {
    let mut graph = DependencyGraph::new(|v: &usize| *v);
    for v in 0..n {
        graph.add_node(v).unwrap();
    }
    for &(from, to) in edges {
        graph.add_edge(&(from % n), &(to % n)).unwrap();
    }
    graph
}

proptest! {
    #[test]
    fn sort_visits_every_node_once(
        n in 1usize..24,
        edges in prop::collection::vec((0usize..64, 0usize..64), 0..80),
    ) {
        let graph = graph_of(n, &edges);
        let mut sorted: Vec<usize> = graph.topological_sort().into_iter().copied().collect();
        prop_assert_eq!(sorted.len(), n);
        sorted.sort_unstable();
        sorted.dedup();
        prop_assert_eq!(sorted.len(), n);
    }

    #[test]
    fn acyclic_graphs_sort_dependencies_first(
        n in 1usize..24,
        edges in prop::collection::vec((0usize..64, 0usize..64), 0..80),
    ) {
        // Only edges towards smaller values: never a cycle.
        let dag: Vec<(usize, usize)> = edges
            .into_iter()
            .map(|(a, b)| (a % n, b % n))
            .filter(|(a, b)| b < a)
            .collect();
        let graph = graph_of(n, &dag);
        prop_assert!(graph.find_cycles().is_empty());

        let sorted: Vec<usize> = graph.topological_sort().into_iter().copied().collect();
        let position = |v: usize| sorted.iter().position(|&x| x == v).unwrap();
        for (from, to) in dag {
            prop_assert!(position(to) < position(from), "{} must precede {}", to, from);
        }
    }

    #[test]
    fn every_reported_cycle_is_closed(
        n in 1usize..16,
        edges in prop::collection::vec((0usize..32, 0usize..32), 0..48),
    ) {
        let graph = graph_of(n, &edges);
        for cycle in graph.find_cycles() {
            let first = *cycle[0];
            let last = *cycle[cycle.len() - 1];
            let successors: Vec<usize> =
                graph.successors(&last).unwrap().into_iter().copied().collect();
            prop_assert!(successors.contains(&first));
        }
    }
}
