//! Bounding volume hierarchy over instance AABBs.
//!
//! Node 0 is the root. Leaves reference a contiguous run of the instance
//! order returned by [`Bvh::order`]; instances are uploaded in that order so
//! `leaf_first` indexes the instance buffer directly.

use glam::Vec3;
use strata_core::{Aabb, Ray};

/// Maximum instances per leaf.
pub const MAX_LEAF_SIZE: usize = 2;

/// One BVH node in GPU layout order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    pub min: Vec3,
    pub max: Vec3,
    pub left: i32,
    pub right: i32,
    pub leaf_first: i32,
    /// Non-zero marks a leaf.
    pub leaf_count: i32,
}

impl BvhNode {
    #[inline]
    pub const fn is_leaf(&self) -> bool {
        self.leaf_count > 0
    }

    #[inline]
    pub const fn bounds(&self) -> Aabb {
        Aabb::new(self.min, self.max)
    }
}

/// Median-split BVH.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    order: Vec<u32>,
}

impl Bvh {
    /// Build over the given boxes. Empty input yields an empty hierarchy.
    pub fn build(aabbs: &[Aabb]) -> Self {
        let mut bvh = Self {
            nodes: Vec::with_capacity(aabbs.len().saturating_mul(2)),
            order: (0..aabbs.len() as u32).collect(),
        };
        if !aabbs.is_empty() {
            bvh.build_node(aabbs, 0, aabbs.len());
        }
        bvh
    }

    fn build_node(&mut self, aabbs: &[Aabb], start: usize, end: usize) -> i32 {
        let index = self.nodes.len();
        let bounds = self.order[start..end]
            .iter()
            .fold(Aabb::EMPTY, |acc, &i| acc.merge(&aabbs[i as usize]));
        self.nodes.push(BvhNode {
            min: bounds.min,
            max: bounds.max,
            left: -1,
            right: -1,
            leaf_first: start as i32,
            leaf_count: (end - start) as i32,
        });

        if end - start <= MAX_LEAF_SIZE {
            return index as i32;
        }

        let centroids = self.order[start..end]
            .iter()
            .fold(Aabb::EMPTY, |mut acc, &i| {
                acc.expand_to_include(aabbs[i as usize].center());
                acc
            });
        let extent = centroids.size();
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };
        self.order[start..end].sort_by(|&a, &b| {
            aabbs[a as usize].center()[axis].total_cmp(&aabbs[b as usize].center()[axis])
        });

        let mid = start + (end - start) / 2;
        let left = self.build_node(aabbs, start, mid);
        let right = self.build_node(aabbs, mid, end);
        let node = &mut self.nodes[index];
        node.left = left;
        node.right = right;
        node.leaf_first = -1;
        node.leaf_count = 0;
        index as i32
    }

    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }

    /// Instance permutation: position `k` in upload order holds input box `order[k]`.
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Positions in upload order of every leaf whose box the ray touches.
    pub fn candidates(&self, ray: &Ray) -> Vec<u32> {
        let mut out = Vec::new();
        if self.nodes.is_empty() {
            return out;
        }
        let mut stack = vec![0i32];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i as usize];
            if node.bounds().intersect_ray(ray).is_none() {
                continue;
            }
            if node.is_leaf() {
                out.extend(node.leaf_first as u32..(node.leaf_first + node.leaf_count) as u32);
            } else {
                stack.push(node.right);
                stack.push(node.left);
            }
        }
        out
    }

    /// Longest root-to-leaf path, for sizing the shader traversal stack.
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[BvhNode], i: i32) -> usize {
            let node = &nodes[i as usize];
            if node.is_leaf() {
                1
            } else {
                1 + walk(nodes, node.left).max(walk(nodes, node.right))
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn boxes(n: usize, seed: u64) -> Vec<Aabb> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let min = Vec3::new(
                    rng.gen_range(-100.0..100.0),
                    rng.gen_range(-100.0..100.0),
                    rng.gen_range(-100.0..100.0),
                );
                Aabb::new(min, min + Vec3::splat(rng.gen_range(1.0..10.0)))
            })
            .collect()
    }

    #[test]
    fn empty_input() {
        let bvh = Bvh::build(&[]);
        assert!(bvh.is_empty());
        assert_eq!(bvh.depth(), 0);
    }

    #[test]
    fn leaves_cover_every_instance_once() {
        let aabbs = boxes(37, 3);
        let bvh = Bvh::build(&aabbs);
        let mut seen = vec![0u32; aabbs.len()];
        for node in bvh.nodes().iter().filter(|n| n.is_leaf()) {
            assert!(node.leaf_count as usize <= MAX_LEAF_SIZE);
            for k in node.leaf_first..node.leaf_first + node.leaf_count {
                let original = bvh.order()[k as usize] as usize;
                seen[original] += 1;
                let b = aabbs[original];
                assert!(node.bounds().contains_point(b.min) && node.bounds().contains_point(b.max));
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
        assert!(bvh.depth() < 64);
    }

    #[test]
    fn inner_nodes_enclose_children() {
        let aabbs = boxes(64, 11);
        let bvh = Bvh::build(&aabbs);
        for node in bvh.nodes().iter().filter(|n| !n.is_leaf()) {
            for child in [node.left, node.right] {
                let c = bvh.nodes()[child as usize];
                assert!(node.bounds().contains_point(c.min));
                assert!(node.bounds().contains_point(c.max));
            }
        }
    }

    #[test]
    fn ray_candidates_include_hit_box() {
        let aabbs = boxes(50, 5);
        let bvh = Bvh::build(&aabbs);
        let target = aabbs[17];
        let ray = Ray::new(target.center() + Vec3::new(0.0, 0.0, 500.0), Vec3::NEG_Z);
        let hits: Vec<u32> = bvh
            .candidates(&ray)
            .into_iter()
            .map(|k| bvh.order()[k as usize])
            .collect();
        assert!(hits.contains(&17));
    }
}
