//! HNSW approximate nearest-neighbor vector index (spec §4.6).
//!
//! The graph lives in an arena (`Vec<Node>`, indexed by a stable node
//! index) cooperating with a parallel vector store; deletions are
//! mark-and-skip, so neighbor lists are never rewritten on delete — only a
//! rebuild reclaims the space (spec §9 "Arenas + ids").

use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::Rng;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VectorIndexError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector id '{0}' not found")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    InnerProduct,
}

impl DistanceMetric {
    /// Lower is closer for every metric. Cosine and inner-product are
    /// expressed as distances (`1 - similarity`, `-dot`) so callers can
    /// always sort ascending.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> Result<f32, VectorIndexError> {
        if a.len() != b.len() {
            return Err(VectorIndexError::DimensionMismatch { expected: a.len(), actual: b.len() });
        }
        Ok(match self {
            DistanceMetric::Euclidean => a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt(),
            DistanceMetric::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
            DistanceMetric::Cosine => {
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return Ok(2.0);
                }
                let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
                1.0 - (dot / (norm_a * norm_b))
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HnswConfig {
    pub m: usize,
    pub m0: usize,
    pub ef_construction: usize,
    pub level_multiplier: f64,
}

impl HnswConfig {
    pub fn new(m: usize) -> Self {
        Self { m, m0: 2 * m, ef_construction: 100, level_multiplier: 1.0 / (m as f64).ln() }
    }
}

struct Node {
    id: String,
    vector: Vec<f32>,
    neighbors: Vec<Vec<usize>>, // neighbors[layer]
}

#[derive(PartialEq)]
struct ScoredNode {
    distance: f32,
    node: usize,
}
impl Eq for ScoredNode {}
impl Ord for ScoredNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.partial_cmp(&other.distance).unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl PartialOrd for ScoredNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct HnswIndex {
    config: HnswConfig,
    metric: DistanceMetric,
    nodes: Vec<Node>,
    id_to_node: HashMap<String, usize>,
    deleted: HashSet<usize>,
    entry_point: Option<usize>,
}

impl HnswIndex {
    pub fn new(config: HnswConfig, metric: DistanceMetric) -> Self {
        Self { config, metric, nodes: Vec::new(), id_to_node: HashMap::new(), deleted: HashSet::new(), entry_point: None }
    }

    pub fn len(&self) -> usize {
        self.nodes.len() - self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn random_level(&self, rng: &mut impl Rng) -> usize {
        let uniform: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        (-uniform.ln() * self.config.level_multiplier).floor() as usize
    }

    pub fn insert(&mut self, id: String, vector: Vec<f32>, rng: &mut impl Rng) -> Result<(), VectorIndexError> {
        if let Some(&existing) = self.id_to_node.get(&id) {
            if let Some(dim) = self.nodes.first().map(|n| n.vector.len()) {
                if dim != vector.len() {
                    return Err(VectorIndexError::DimensionMismatch { expected: dim, actual: vector.len() });
                }
            }
            self.deleted.remove(&existing);
            self.nodes[existing].vector = vector;
            return Ok(());
        }
        if let Some(dim) = self.nodes.first().map(|n| n.vector.len()) {
            if dim != vector.len() {
                return Err(VectorIndexError::DimensionMismatch { expected: dim, actual: vector.len() });
            }
        }

        let level = self.random_level(rng);
        let node_idx = self.nodes.len();
        self.nodes.push(Node { id: id.clone(), vector: vector.clone(), neighbors: vec![Vec::new(); level + 1] });
        self.id_to_node.insert(id, node_idx);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(node_idx);
            return Ok(());
        };

        let entry_level = self.nodes[entry].neighbors.len() - 1;
        let mut current_nearest = entry;

        // Greedy-descend layers above the new node's top layer.
        for layer in ((level + 1)..=entry_level).rev() {
            current_nearest = self.greedy_closest(&vector, current_nearest, layer);
        }

        // Connect at every layer from the new node's top down to 0.
        for layer in (0..=level.min(entry_level)).rev() {
            let candidates = self.search_layer(&vector, current_nearest, self.config.ef_construction, layer);
            let max_conn = if layer == 0 { self.config.m0 } else { self.config.m };
            let selected: Vec<usize> = candidates.iter().take(max_conn).map(|c| c.node).collect();

            for &neighbor in &selected {
                self.nodes[node_idx].neighbors[layer].push(neighbor);
                let neighbor_layer_conns = &mut self.nodes[neighbor].neighbors[layer];
                neighbor_layer_conns.push(node_idx);
                if neighbor_layer_conns.len() > max_conn {
                    self.prune_neighbors(neighbor, layer, max_conn);
                }
            }
            if let Some(&closest) = selected.first() {
                current_nearest = closest;
            }
        }

        if level > entry_level {
            self.entry_point = Some(node_idx);
        }
        Ok(())
    }

    fn prune_neighbors(&mut self, node: usize, layer: usize, max_conn: usize) {
        let vector = self.nodes[node].vector.clone();
        let mut scored: Vec<(usize, f32)> = self.nodes[node].neighbors[layer]
            .iter()
            .map(|&n| (n, self.metric.distance(&vector, &self.nodes[n].vector).unwrap_or(f32::MAX)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        scored.truncate(max_conn);
        self.nodes[node].neighbors[layer] = scored.into_iter().map(|(n, _)| n).collect();
    }

    fn greedy_closest(&self, query: &[f32], start: usize, layer: usize) -> usize {
        let mut current = start;
        loop {
            let mut best = current;
            let mut best_dist = self.metric.distance(query, &self.nodes[current].vector).unwrap_or(f32::MAX);
            for &neighbor in &self.nodes[current].neighbors[layer] {
                let d = self.metric.distance(query, &self.nodes[neighbor].vector).unwrap_or(f32::MAX);
                if d < best_dist {
                    best = neighbor;
                    best_dist = d;
                }
            }
            if best == current {
                return current;
            }
            current = best;
        }
    }

    fn search_layer(&self, query: &[f32], entry: usize, ef: usize, layer: usize) -> Vec<ScoredNode> {
        let mut visited = HashSet::new();
        visited.insert(entry);
        let entry_dist = self.metric.distance(query, &self.nodes[entry].vector).unwrap_or(f32::MAX);

        let mut candidates: BinaryHeap<std::cmp::Reverse<ScoredNode>> =
            BinaryHeap::from([std::cmp::Reverse(ScoredNode { distance: entry_dist, node: entry })]);
        let mut found: Vec<ScoredNode> = vec![ScoredNode { distance: entry_dist, node: entry }];

        while let Some(std::cmp::Reverse(current)) = candidates.pop() {
            let worst_found = found.iter().map(|f| f.distance).fold(f32::MIN, f32::max);
            if current.distance > worst_found && found.len() >= ef {
                break;
            }
            if layer >= self.nodes[current.node].neighbors.len() {
                continue;
            }
            for &neighbor in &self.nodes[current.node].neighbors[layer].clone() {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = self.metric.distance(query, &self.nodes[neighbor].vector).unwrap_or(f32::MAX);
                if found.len() < ef || d < worst_found {
                    candidates.push(std::cmp::Reverse(ScoredNode { distance: d, node: neighbor }));
                    found.push(ScoredNode { distance: d, node: neighbor });
                }
            }
        }

        found.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        found.into_iter().filter(|f| !self.deleted.contains(&f.node)).collect()
    }

    pub fn query(&self, vector: &[f32], k: usize, ef: usize) -> Result<Vec<(String, f32)>, VectorIndexError> {
        let Some(entry) = self.entry_point else { return Ok(Vec::new()) };
        if let Some(dim) = self.nodes.first().map(|n| n.vector.len()) {
            if dim != vector.len() {
                return Err(VectorIndexError::DimensionMismatch { expected: dim, actual: vector.len() });
            }
        }

        let top_layer = self.nodes[entry].neighbors.len() - 1;
        let mut current = entry;
        for layer in (1..=top_layer).rev() {
            current = self.greedy_closest(vector, current, layer);
        }
        let candidates = self.search_layer(vector, current, ef.max(k), 0);
        Ok(candidates.into_iter().take(k).map(|c| (self.nodes[c.node].id.clone(), c.distance)).collect())
    }

    /// Mark-and-skip delete: the node's neighbor lists are left untouched.
    pub fn delete(&mut self, id: &str) -> Result<(), VectorIndexError> {
        let &node = self.id_to_node.get(id).ok_or_else(|| VectorIndexError::NotFound(id.to_string()))?;
        self.deleted.insert(node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn distance_rejects_dimension_mismatch() {
        let err = DistanceMetric::Cosine.distance(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(err, VectorIndexError::DimensionMismatch { .. }));
    }

    #[test]
    fn cosine_zero_vector_is_maximal_distance() {
        let d = DistanceMetric::Cosine.distance(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
        assert_eq!(d, 2.0);
    }

    #[test]
    fn cosine_and_inner_product_agree_for_unit_vectors() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let cosine = DistanceMetric::Cosine.distance(&a, &b).unwrap();
        let inner = DistanceMetric::InnerProduct.distance(&a, &b).unwrap();
        assert!((cosine - (1.0 - -inner)).abs() < 1e-6);
    }

    #[test]
    fn insert_and_query_finds_nearest_neighbor() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut index = HnswIndex::new(HnswConfig::new(8), DistanceMetric::Euclidean);
        for i in 0..50 {
            let v = vec![i as f32, (i * 2) as f32];
            index.insert(format!("n{i}"), v, &mut rng).unwrap();
        }
        let results = index.query(&[10.0, 20.0], 1, 32).unwrap();
        assert_eq!(results[0].0, "n10");
    }

    #[test]
    fn query_rejects_dimension_mismatch() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let mut index = HnswIndex::new(HnswConfig::new(4), DistanceMetric::Euclidean);
        index.insert("a".into(), vec![1.0, 2.0], &mut rng).unwrap();
        let err = index.query(&[1.0], 1, 16).unwrap_err();
        assert!(matches!(err, VectorIndexError::DimensionMismatch { .. }));
    }

    #[test]
    fn deleted_nodes_are_excluded_from_query_results() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut index = HnswIndex::new(HnswConfig::new(8), DistanceMetric::Euclidean);
        for i in 0..10 {
            index.insert(format!("n{i}"), vec![i as f32], &mut rng).unwrap();
        }
        index.delete("n5").unwrap();
        let results = index.query(&[5.0], 10, 32).unwrap();
        assert!(!results.iter().any(|(id, _)| id == "n5"));
    }

    #[test]
    fn recall_is_reasonable_at_default_ef() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let mut index = HnswIndex::new(HnswConfig::new(16), DistanceMetric::Euclidean);
        let points: Vec<Vec<f32>> = (0..200).map(|i| vec![(i as f32).sin() * 100.0, (i as f32).cos() * 100.0]).collect();
        for (i, p) in points.iter().enumerate() {
            index.insert(format!("n{i}"), p.clone(), &mut rng).unwrap();
        }

        let query = points[0].clone();
        let mut exact: Vec<(usize, f32)> = points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, DistanceMetric::Euclidean.distance(&query, p).unwrap()))
            .collect();
        exact.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let exact_top10: HashSet<String> = exact.iter().take(10).map(|(i, _)| format!("n{i}")).collect();

        let approx = index.query(&query, 10, 64).unwrap();
        let hits = approx.iter().filter(|(id, _)| exact_top10.contains(id)).count();
        assert!(hits >= 7, "recall too low: {hits}/10");
    }
}
