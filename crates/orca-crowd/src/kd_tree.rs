//! k-d tree over agent positions
//!
//! Rebuilt from scratch every tick. Nodes split their points at the median
//! of the wider axis until at most [`MAX_LEAF_SIZE`] points remain. Points
//! are addressed by their index in the slice given to [`AgentKdTree::build`].

use std::cmp::Ordering;

use crowd_common::{distance_point_aabb_squared, Vec2};

/// Maximum number of points stored in a leaf
pub const MAX_LEAF_SIZE: usize = 8;

#[derive(Debug, Clone, Copy)]
struct KdNode {
    begin: u32,
    end: u32,
    left: u32,
    right: u32,
    min: Vec2,
    max: Vec2,
}

impl KdNode {
    fn is_leaf(&self) -> bool {
        self.left == u32::MAX
    }
}

/// Balanced k-d tree of 2D points
#[derive(Debug, Clone, Default)]
pub struct AgentKdTree {
    points: Vec<Vec2>,
    order: Vec<u32>,
    nodes: Vec<KdNode>,
}

impl AgentKdTree {
    /// Creates an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the tree over `points`, reusing the existing allocations
    pub fn build(&mut self, points: &[Vec2]) {
        self.points.clear();
        self.points.extend_from_slice(points);
        self.order.clear();
        self.order.extend(0..points.len() as u32);
        self.nodes.clear();

        if !points.is_empty() {
            self.build_recursive(0, points.len());
        }
    }

    /// Number of indexed points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Checks if the tree is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn build_recursive(&mut self, begin: usize, end: usize) -> u32 {
        let (min, max) = self.order[begin..end].iter().fold(
            (Vec2::splat(f32::INFINITY), Vec2::splat(f32::NEG_INFINITY)),
            |(min, max), &i| {
                let p = self.points[i as usize];
                (min.min(p), max.max(p))
            },
        );

        let node_index = self.nodes.len() as u32;
        self.nodes.push(KdNode {
            begin: begin as u32,
            end: end as u32,
            left: u32::MAX,
            right: u32::MAX,
            min,
            max,
        });

        if end - begin > MAX_LEAF_SIZE {
            let extent = max - min;
            let split_x = extent.x >= extent.y;
            let mid = begin + (end - begin) / 2;

            let points = &self.points;
            let key = |i: u32| {
                let p = points[i as usize];
                if split_x { p.x } else { p.y }
            };
            self.order[begin..end].select_nth_unstable_by(mid - begin, |&a, &b| {
                key(a).total_cmp(&key(b)).then(a.cmp(&b))
            });

            let left = self.build_recursive(begin, mid);
            let right = self.build_recursive(mid, end);
            let node = &mut self.nodes[node_index as usize];
            node.left = left;
            node.right = right;
        }

        node_index
    }

    /// Collects every point within `radius` of `center` into `out`, sorted by
    /// index. `out` is cleared first.
    pub fn query_radius(&self, center: Vec2, radius: f32, out: &mut Vec<u32>) {
        out.clear();
        if self.nodes.is_empty() || radius.is_nan() || radius < 0.0 {
            return;
        }
        self.radius_recursive(0, center, radius * radius, out);
        out.sort_unstable();
    }

    fn radius_recursive(&self, node_index: u32, center: Vec2, range_sq: f32, out: &mut Vec<u32>) {
        let node = &self.nodes[node_index as usize];
        if distance_point_aabb_squared(center, node.min, node.max) > range_sq {
            return;
        }
        if node.is_leaf() {
            out.extend(
                self.order[node.begin as usize..node.end as usize]
                    .iter()
                    .copied()
                    .filter(|&i| (self.points[i as usize] - center).length_squared() <= range_sq),
            );
        } else {
            self.radius_recursive(node.left, center, range_sq, out);
            self.radius_recursive(node.right, center, range_sq, out);
        }
    }

    /// Collects the `k` points nearest to `center` within `radius`, skipping
    /// `exclude`, as `(distance², index)` pairs sorted by distance with ties
    /// broken by index. `out` is cleared first.
    pub fn query_nearest(
        &self,
        center: Vec2,
        k: usize,
        radius: f32,
        exclude: Option<u32>,
        out: &mut Vec<(f32, u32)>,
    ) {
        out.clear();
        if self.nodes.is_empty() || k == 0 || radius.is_nan() || radius < 0.0 {
            return;
        }
        let mut range_sq = radius * radius;
        self.nearest_recursive(0, center, k, exclude, &mut range_sq, out);
    }

    fn nearest_recursive(
        &self,
        node_index: u32,
        center: Vec2,
        k: usize,
        exclude: Option<u32>,
        range_sq: &mut f32,
        out: &mut Vec<(f32, u32)>,
    ) {
        let node = &self.nodes[node_index as usize];

        if node.is_leaf() {
            for &i in &self.order[node.begin as usize..node.end as usize] {
                if Some(i) == exclude {
                    continue;
                }
                let dist_sq = (self.points[i as usize] - center).length_squared();
                if dist_sq > *range_sq {
                    continue;
                }
                insert_candidate(out, k, (dist_sq, i));
                if out.len() == k {
                    // Boundary ties must still be visited so the index
                    // tie-break stays independent of traversal order
                    *range_sq = out[k - 1].0;
                }
            }
            return;
        }

        let left = &self.nodes[node.left as usize];
        let right = &self.nodes[node.right as usize];
        let dist_left = distance_point_aabb_squared(center, left.min, left.max);
        let dist_right = distance_point_aabb_squared(center, right.min, right.max);

        let (near, near_dist, far, far_dist) = if dist_left <= dist_right {
            (node.left, dist_left, node.right, dist_right)
        } else {
            (node.right, dist_right, node.left, dist_left)
        };

        if near_dist <= *range_sq {
            self.nearest_recursive(near, center, k, exclude, range_sq, out);
        }
        if far_dist <= *range_sq {
            self.nearest_recursive(far, center, k, exclude, range_sq, out);
        }
    }
}

fn compare_candidates(a: &(f32, u32), b: &(f32, u32)) -> Ordering {
    a.0.total_cmp(&b.0).then(a.1.cmp(&b.1))
}

/// Inserts into a list kept sorted and capped at `k` entries
fn insert_candidate(out: &mut Vec<(f32, u32)>, k: usize, candidate: (f32, u32)) {
    if out.len() == k {
        match out.last() {
            Some(last) if compare_candidates(&candidate, last) == Ordering::Less => {
                out.pop();
            }
            _ => return,
        }
    }
    let at = out
        .binary_search_by(|probe| compare_candidates(probe, &candidate))
        .unwrap_or_else(|pos| pos);
    out.insert(at, candidate);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_points(n: usize) -> Vec<Vec2> {
        (0..n)
            .map(|i| Vec2::new((i % 10) as f32, (i / 10) as f32))
            .collect()
    }

    fn brute_radius(points: &[Vec2], center: Vec2, radius: f32) -> Vec<u32> {
        (0..points.len() as u32)
            .filter(|&i| (points[i as usize] - center).length_squared() <= radius * radius)
            .collect()
    }

    #[test]
    fn test_empty_tree() {
        let mut tree = AgentKdTree::new();
        tree.build(&[]);
        let mut out = vec![7];
        tree.query_radius(Vec2::ZERO, 10.0, &mut out);
        assert!(out.is_empty());

        let mut nearest = Vec::new();
        tree.query_nearest(Vec2::ZERO, 3, 10.0, None, &mut nearest);
        assert!(nearest.is_empty());
    }

    #[test]
    fn test_radius_query_matches_brute_force() {
        let points = grid_points(100);
        let mut tree = AgentKdTree::new();
        tree.build(&points);
        assert_eq!(tree.len(), 100);

        let mut out = Vec::new();
        for &(center, radius) in &[
            (Vec2::new(4.5, 4.5), 2.0),
            (Vec2::new(0.0, 0.0), 1.0),
            (Vec2::new(9.0, 9.0), 0.0),
            (Vec2::new(-5.0, -5.0), 3.0),
            (Vec2::new(5.0, 5.0), 100.0),
        ] {
            tree.query_radius(center, radius, &mut out);
            assert_eq!(out, brute_radius(&points, center, radius));
        }
    }

    #[test]
    fn test_nearest_query_order_and_ties() {
        let points = grid_points(100);
        let mut tree = AgentKdTree::new();
        tree.build(&points);

        // Center of cell (4, 4): the four lattice neighbours at distance 1
        // tie and must come back in index order
        let mut out = Vec::new();
        tree.query_nearest(Vec2::new(4.0, 4.0), 5, 5.0, Some(44), &mut out);
        let indices: Vec<u32> = out.iter().map(|&(_, i)| i).collect();
        assert_eq!(indices[..4], [34, 43, 45, 54]);
        assert!(out.windows(2).all(|w| w[0].0 <= w[1].0));
        assert!(!indices.contains(&44));
    }

    #[test]
    fn test_nearest_respects_radius() {
        let points = vec![Vec2::new(0.0, 0.0), Vec2::new(3.0, 0.0), Vec2::new(10.0, 0.0)];
        let mut tree = AgentKdTree::new();
        tree.build(&points);

        let mut out = Vec::new();
        tree.query_nearest(Vec2::ZERO, 10, 5.0, Some(0), &mut out);
        assert_eq!(out, vec![(9.0, 1)]);
    }

    #[test]
    fn test_coincident_points() {
        let points = vec![Vec2::ONE; 20];
        let mut tree = AgentKdTree::new();
        tree.build(&points);

        let mut out = Vec::new();
        tree.query_nearest(Vec2::ONE, 3, 1.0, Some(0), &mut out);
        assert_eq!(out, vec![(0.0, 1), (0.0, 2), (0.0, 3)]);

        let mut all = Vec::new();
        tree.query_radius(Vec2::ONE, 0.0, &mut all);
        assert_eq!(all.len(), 20);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let points = grid_points(57);
        let mut tree = AgentKdTree::new();

        tree.build(&points);
        let mut first = Vec::new();
        tree.query_nearest(Vec2::new(3.3, 2.1), 6, 4.0, None, &mut first);

        tree.build(&points);
        let mut second = Vec::new();
        tree.query_nearest(Vec2::new(3.3, 2.1), 6, 4.0, None, &mut second);

        assert_eq!(first, second);
    }
}
