//! Test helpers shared by the workspace crates.

#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::default_trait_access,
    clippy::cast_precision_loss
)]

use rand::Rng;

/// Generates a random directed graph on `vertices` vertices, in which every ordered pair of
/// vertices (including a vertex and itself) is connected with the given probability.
pub fn random_digraph<R: Rng + ?Sized>(
    rng: &mut R,
    vertices: usize,
    probability: f64,
) -> Vec<(usize, usize)> {
    let mut edges = Vec::new();
    for from in 0..vertices {
        for to in 0..vertices {
            if rng.gen_bool(probability) {
                edges.push((from, to));
            }
        }
    }
    edges
}

/// Vertices reachable from each vertex in one or more steps.
fn reachability(vertices: usize, edges: &[(usize, usize)]) -> Vec<Vec<bool>> {
    let mut adjacency = vec![Vec::new(); vertices];
    for &(from, to) in edges {
        adjacency[from].push(to);
    }
    (0..vertices)
        .map(|start| {
            let mut reached = vec![false; vertices];
            let mut stack = adjacency[start].clone();
            while let Some(v) = stack.pop() {
                if !reached[v] {
                    reached[v] = true;
                    stack.extend(adjacency[v].iter().copied());
                }
            }
            reached
        })
        .collect()
}

/// Checks if a directed graph contains a knot by brute force.
///
/// A graph has a knot if and only if some vertex `v` reaches at least one vertex, and every
/// vertex reachable from `v` can reach `v` back.
#[must_use]
pub fn has_knot(vertices: usize, edges: &[(usize, usize)]) -> bool {
    let reach = reachability(vertices, edges);
    (0..vertices).any(|v| {
        reach[v].iter().any(|&r| r)
            && reach[v]
                .iter()
                .enumerate()
                .filter(|(_, r)| **r)
                .all(|(u, _)| reach[u][v])
    })
}

/// Arithmetic mean, `NaN` for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_has_knot() {
        assert!(!has_knot(0, &[]));
        assert!(!has_knot(2, &[]));
        assert!(has_knot(1, &[(0, 0)]));
        assert!(!has_knot(2, &[(0, 0), (0, 1)]));
        assert!(has_knot(3, &[(0, 1), (1, 2), (2, 1)]));
        assert!(!has_knot(3, &[(0, 1), (1, 0), (1, 2)]));
    }

    #[test]
    fn test_random_digraph_extremes() {
        let mut rng = StepRng::new(0, 1);
        assert!(random_digraph(&mut rng, 4, 0.0).is_empty());
        assert_eq!(random_digraph(&mut rng, 4, 1.0).len(), 16);
    }

    #[test]
    fn test_mean() {
        assert!((mean(&[1.0, 2.0, 6.0]) - 3.0).abs() < f64::EPSILON);
        assert!(mean(&[]).is_nan());
    }
}
