//! Keyed directed graph used to order modules by their resource dependencies.
//!
//! Nodes are kept in insertion order and addressed by a key extracted from the
//! node data. An edge `from -> to` means "`from` depends on `to`", so
//! [`DependencyGraph::topological_sort`] yields every `to` before its `from`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

use thiserror::Error;

/// Structural errors of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node with key '{key}' already exists")]
    DuplicateNode { key: String },
    #[error("no such node: '{key}'")]
    NoSuchNode { key: String },
}

struct Node<T> {
    data: T,
    // A set: repeated edges collapse into one.
    next: BTreeSet<usize>,
}

type KeyFn<K, T> = Box<dyn Fn(&T) -> K + Send>;

/// Directed graph over `T` values identified by keys of type `K`.
pub struct DependencyGraph<K, T> {
    key_of: KeyFn<K, T>,
    nodes: Vec<Node<T>>,
    index: HashMap<K, usize>,
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White, // unvisited
    Gray,  // on the current DFS path
    Black, // finished
}

impl<K, T> DependencyGraph<K, T>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    /// Create an empty graph; `key_of` extracts the unique key of a node.
    pub fn new(key_of: impl Fn(&T) -> K + Send + 'static) -> Self {
        Self {
            key_of: Box::new(key_of),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Append a node. Fails without modifying the graph if the key is taken.
    pub fn add_node(&mut self, data: T) -> Result<(), GraphError> {
        let key = (self.key_of)(&data);
        if self.index.contains_key(&key) {
            return Err(GraphError::DuplicateNode {
                key: key.to_string(),
            });
        }
        self.index.insert(key, self.nodes.len());
        self.nodes.push(Node {
            data,
            next: BTreeSet::new(),
        });
        Ok(())
    }

    /// Add an edge `from -> to` between two existing nodes.
    pub fn add_edge(&mut self, from: &K, to: &K) -> Result<(), GraphError> {
        let from = self.index_of(from)?;
        let to = self.index_of(to)?;
        self.nodes[from].next.insert(to);
        Ok(())
    }

    /// Same as [`add_edge`](Self::add_edge), with keys taken from node data.
    pub fn add_edge_between(&mut self, from: &T, to: &T) -> Result<(), GraphError> {
        let from = (self.key_of)(from);
        let to = (self.key_of)(to);
        self.add_edge(&from, &to)
    }

    pub fn node(&self, key: &K) -> Result<&T, GraphError> {
        let i = self.index_of(key)?;
        Ok(&self.nodes[i].data)
    }

    pub fn node_mut(&mut self, key: &K) -> Result<&mut T, GraphError> {
        let i = self.index_of(key)?;
        Ok(&mut self.nodes[i].data)
    }

    /// Direct successors of a node, in insertion order of the targets.
    pub fn successors(&self, key: &K) -> Result<Vec<&T>, GraphError> {
        let i = self.index_of(key)?;
        Ok(self.nodes[i]
            .next
            .iter()
            .map(|&n| &self.nodes[n].data)
            .collect())
    }

    /// Dependencies-first ordering of all nodes.
    ///
    /// Always returns exactly [`len`](Self::len) elements. On a cyclic graph the
    /// relative order of the nodes on the cycle is unspecified, but the call
    /// still terminates.
    pub fn topological_sort(&self) -> Vec<&T> {
        self.sorted_indices()
            .into_iter()
            .map(|i| &self.nodes[i].data)
            .collect()
    }

    /// Consuming variant of [`topological_sort`](Self::topological_sort).
    pub fn into_sorted(self) -> Vec<T> {
        let order = self.sorted_indices();
        let mut slots: Vec<Option<T>> = self.nodes.into_iter().map(|n| Some(n.data)).collect();
        order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect()
    }

    /// Give back node data in insertion order, dropping the edges.
    pub fn into_nodes(self) -> Vec<T> {
        self.nodes.into_iter().map(|n| n.data).collect()
    }

    /// Enumerate cycles reachable in the graph.
    ///
    /// Each cycle starts at the node that was re-entered and follows the DFS
    /// path to the node holding the back edge. A node that merely has two
    /// forward paths leading to it (a diamond) is not a cycle.
    pub fn find_cycles(&self) -> Vec<Vec<&T>> {
        self.cycle_indices()
            .into_iter()
            .map(|cycle| cycle.into_iter().map(|i| &self.nodes[i].data).collect())
            .collect()
    }

    fn index_of(&self, key: &K) -> Result<usize, GraphError> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| GraphError::NoSuchNode {
                key: key.to_string(),
            })
    }

    fn sorted_indices(&self) -> Vec<usize> {
        fn visit<T>(node: usize, nodes: &[Node<T>], visited: &mut [bool], out: &mut Vec<usize>) {
            visited[node] = true;
            for &next in &nodes[node].next {
                if !visited[next] {
                    visit(next, nodes, visited, out);
                }
            }
            out.push(node);
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut out = Vec::with_capacity(self.nodes.len());
        for i in 0..self.nodes.len() {
            if !visited[i] {
                visit(i, &self.nodes, &mut visited, &mut out);
            }
        }
        out
    }

    fn cycle_indices(&self) -> Vec<Vec<usize>> {
        fn dfs<T>(
            node: usize,
            nodes: &[Node<T>],
            colors: &mut [Color],
            path: &mut Vec<usize>,
            cycles: &mut Vec<Vec<usize>>,
        ) {
            colors[node] = Color::Gray;
            path.push(node);

            for &next in &nodes[node].next {
                match colors[next] {
                    Color::Gray => {
                        // Back edge: the cycle is the path suffix starting at `next`.
                        if let Some(start) = path.iter().position(|&n| n == next) {
                            cycles.push(path[start..].to_vec());
                        }
                    }
                    Color::White => dfs(next, nodes, colors, path, cycles),
                    Color::Black => {}
                }
            }

            path.pop();
            colors[node] = Color::Black;
        }

        let mut colors = vec![Color::White; self.nodes.len()];
        let mut path = Vec::new();
        let mut cycles = Vec::new();
        for i in 0..self.nodes.len() {
            if colors[i] == Color::White {
                dfs(i, &self.nodes, &mut colors, &mut path, &mut cycles);
            }
        }
        cycles
    }
}

impl<K, T> fmt::Debug for DependencyGraph<K, T>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<(&K, usize)> = self.index.iter().map(|(k, &i)| (k, i)).collect();
        keys.sort_by_key(|&(_, i)| i);
        f.debug_struct("DependencyGraph")
            .field("nodes", &keys.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .field(
                "edges",
                &self.nodes.iter().map(|n| n.next.len()).sum::<usize>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(names: &[&'static str]) -> DependencyGraph<&'static str, &'static str> {
        let mut g = DependencyGraph::new(|n: &&'static str| *n);
        for n in names {
            g.add_node(*n).unwrap();
        }
        g
    }

    fn position(order: &[&&'static str], name: &str) -> usize {
        order.iter().position(|n| **n == name).unwrap()
    }

    #[test]
    fn duplicate_node_is_rejected_and_size_unchanged() {
        let mut g = graph(&["a", "b"]);
        let err = g.add_node("a").unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode { key: "a".into() });
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn edge_to_unknown_node_is_rejected() {
        let mut g = graph(&["a"]);
        let err = g.add_edge(&"a", &"ghost").unwrap_err();
        assert_eq!(err, GraphError::NoSuchNode { key: "ghost".into() });
        let err = g.add_edge(&"ghost", &"a").unwrap_err();
        assert_eq!(err, GraphError::NoSuchNode { key: "ghost".into() });
        assert!(g.successors(&"a").unwrap().is_empty());
    }

    #[test]
    fn repeated_edges_collapse() {
        let mut g = graph(&["a", "b"]);
        g.add_edge(&"a", &"b").unwrap();
        g.add_edge_between(&"a", &"b").unwrap();
        assert_eq!(g.successors(&"a").unwrap(), vec![&"b"]);
    }

    #[test]
    fn node_lookup_and_mutation() {
        let mut g: DependencyGraph<String, (String, u32)> = DependencyGraph::new(|n: &(String, u32)| n.0.clone());
        g.add_node(("a".into(), 1)).unwrap();
        g.node_mut(&"a".to_string()).unwrap().1 = 7;
        assert_eq!(g.node(&"a".to_string()).unwrap().1, 7);
        assert!(matches!(
            g.node(&"b".to_string()),
            Err(GraphError::NoSuchNode { .. })
        ));
    }

    #[test]
    fn dependencies_come_first() {
        // consumer -> provider edges, registered in consumer-first order
        let mut g = graph(&["app", "db", "log"]);
        g.add_edge(&"app", &"db").unwrap();
        g.add_edge(&"app", &"log").unwrap();
        g.add_edge(&"db", &"log").unwrap();

        let order = g.topological_sort();
        assert_eq!(order, vec![&"log", &"db", &"app"]);
        assert!(g.find_cycles().is_empty());
    }

    #[test]
    fn into_sorted_moves_nodes_in_order() {
        let mut g = graph(&["c", "p"]);
        g.add_edge(&"c", &"p").unwrap();
        assert_eq!(g.into_sorted(), vec!["p", "c"]);
    }

    #[test]
    fn self_loop_is_a_single_cycle() {
        let mut g = graph(&["a"]);
        g.add_edge(&"a", &"a").unwrap();
        let cycles = g.find_cycles();
        assert_eq!(cycles, vec![vec![&"a"]]);
        assert_eq!(g.topological_sort().len(), 1);
    }

    #[test]
    fn mutual_dependency_is_reported_once() {
        let mut g = graph(&["a", "b"]);
        g.add_edge(&"a", &"b").unwrap();
        g.add_edge(&"b", &"a").unwrap();
        let cycles = g.find_cycles();
        assert_eq!(cycles, vec![vec![&"a", &"b"]]);
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut g = graph(&["r", "m1", "m2", "l"]);
        g.add_edge(&"r", &"m1").unwrap();
        g.add_edge(&"r", &"m2").unwrap();
        g.add_edge(&"m1", &"l").unwrap();
        g.add_edge(&"m2", &"l").unwrap();

        assert!(g.find_cycles().is_empty());

        let order = g.topological_sort();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "l") < position(&order, "m1"));
        assert!(position(&order, "l") < position(&order, "m2"));
        assert!(position(&order, "m1") < position(&order, "r"));
        assert!(position(&order, "m2") < position(&order, "r"));
    }

    #[test]
    fn cycle_excludes_the_path_leading_into_it() {
        let mut g = graph(&["entry", "a", "b", "c", "other"]);
        g.add_edge(&"entry", &"a").unwrap();
        g.add_edge(&"a", &"b").unwrap();
        g.add_edge(&"b", &"c").unwrap();
        g.add_edge(&"c", &"a").unwrap();

        let cycles = g.find_cycles();
        assert_eq!(cycles, vec![vec![&"a", &"b", &"c"]]);
        assert_eq!(g.topological_sort().len(), 5);
    }

    #[test]
    fn independent_cycles_are_each_reported() {
        let mut g = graph(&["a", "b", "c", "d"]);
        g.add_edge(&"a", &"b").unwrap();
        g.add_edge(&"b", &"a").unwrap();
        g.add_edge(&"c", &"d").unwrap();
        g.add_edge(&"d", &"c").unwrap();
        assert_eq!(g.find_cycles().len(), 2);
    }

    #[test]
    fn into_nodes_keeps_insertion_order() {
        let mut g = graph(&["z", "a", "m"]);
        g.add_edge(&"z", &"m").unwrap();
        assert_eq!(g.into_nodes(), vec!["z", "a", "m"]);
    }
}
