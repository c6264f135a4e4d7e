//! Small graph helpers shared by the model builders and analysis passes.

use std::collections::HashMap;
use std::hash::Hash;

/// Produces a topological ordering of `vertices` under `edges` (source →
/// destinations), or `None` if the graph contains a cycle.
pub fn topological_sort<V: Copy + Eq + Hash>(
    vertices: &[V],
    edges: &HashMap<V, Vec<V>>,
) -> Option<Vec<V>> {
    let mut in_degree: HashMap<V, usize> = HashMap::new();
    for dsts in edges.values() {
        for &dst in dsts {
            *in_degree.entry(dst).or_insert(0) += 1;
        }
    }

    let mut ordering: Vec<V> = vertices
        .iter()
        .copied()
        .filter(|v| !in_degree.contains_key(v))
        .collect();

    let mut next = 0;
    while next < ordering.len() && ordering.len() < vertices.len() {
        let vertex = ordering[next];
        if let Some(dsts) = edges.get(&vertex) {
            for &dst in dsts {
                let degree = in_degree.get_mut(&dst).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ordering.push(dst);
                }
            }
        }
        next += 1;
    }

    if ordering.len() < vertices.len() {
        None
    } else {
        Some(ordering)
    }
}
