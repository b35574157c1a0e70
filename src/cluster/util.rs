/// Disjoint-set forest with union by size and path halving.
#[derive(Clone, Debug)]
pub(crate) struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge two roots; returns the surviving root.
    pub(crate) fn merge(&mut self, ra: usize, rb: usize) -> usize {
        if ra == rb {
            return ra;
        }
        let (big, small) = if self.size[ra] < self.size[rb] {
            (rb, ra)
        } else {
            (ra, rb)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        big
    }

    /// Number of elements in the component rooted at `root`.
    pub(crate) fn component_size(&self, root: usize) -> usize {
        self.size[root]
    }
}

/// Edge of a minimum spanning tree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct MstEdge {
    pub(crate) a: usize,
    pub(crate) b: usize,
    pub(crate) weight: f32,
}

/// Minimum spanning tree of the complete graph over `n` nodes (Prim, O(n^2)).
///
/// `weight(i, j)` must be symmetric. Edges come back sorted by ascending weight,
/// ties in discovery order.
pub(crate) fn prim_mst(n: usize, weight: impl Fn(usize, usize) -> f32) -> Vec<MstEdge> {
    if n <= 1 {
        return Vec::new();
    }

    let mut in_tree = vec![false; n];
    // Cheapest known connection of each outside node to the tree.
    let mut link = vec![(usize::MAX, f32::INFINITY); n];
    let mut edges = Vec::with_capacity(n - 1);

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        let mut next = None;
        for v in 0..n {
            if in_tree[v] {
                continue;
            }
            let w = weight(current, v);
            if w < link[v].1 {
                link[v] = (current, w);
            }
            // Ties (and all-infinite rows) resolve to the lowest index.
            if next.map_or(true, |u: usize| link[v].1 < link[u].1) {
                next = Some(v);
            }
        }
        let Some(v) = next else { break };
        in_tree[v] = true;
        edges.push(MstEdge {
            a: link[v].0,
            b: v,
            weight: link[v].1,
        });
        current = v;
    }

    edges.sort_by(|x, y| x.weight.total_cmp(&y.weight));
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_find_merges_by_size() {
        let mut uf = UnionFind::new(4);
        let r = uf.merge(0, 1);
        let r = uf.merge(r, 2);
        assert_eq!(uf.component_size(r), 3);
        assert_eq!(uf.find(2), uf.find(0));
        assert_ne!(uf.find(3), uf.find(0));
    }

    #[test]
    fn prim_spans_every_point_in_weight_order() {
        let pts = [5.0f32, 0.0, 5.5, 1.0];
        let edges = prim_mst(pts.len(), |i, j| (pts[i] - pts[j]).abs());
        assert_eq!(edges.len(), 3);
        let total: f32 = edges.iter().map(|e| e.weight).sum();
        assert!((total - 5.5).abs() < 1e-6);
        assert!(edges.windows(2).all(|w| w[0].weight <= w[1].weight));
    }

    #[test]
    fn prim_connects_zero_weight_graphs() {
        let edges = prim_mst(5, |_, _| 0.0);
        assert_eq!(edges.len(), 4);
        let mut uf = UnionFind::new(5);
        for e in &edges {
            let (ra, rb) = (uf.find(e.a), uf.find(e.b));
            uf.merge(ra, rb);
        }
        let root = uf.find(0);
        assert_eq!(uf.component_size(root), 5);
    }

    #[test]
    fn prim_on_trivial_graphs() {
        assert!(prim_mst(0, |_, _| 1.0).is_empty());
        assert!(prim_mst(1, |_, _| 1.0).is_empty());
    }
}
