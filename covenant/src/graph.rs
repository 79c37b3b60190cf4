//! Node/edge view of a [`Covenant`]. Reachability only, no validation here.

use crate::types::Covenant;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CovenantGraph {
    nodes: BTreeSet<String>,
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl CovenantGraph {
    /// Nodes are every type a manifest, route or terminal mentions. Edges are
    /// route `source -> target` plus `consumed -> produced` inside each branch.
    pub fn from_covenant(covenant: &Covenant) -> Self {
        let mut graph = Self::default();

        for m in &covenant.manifests {
            graph.nodes.extend(m.produces.iter().cloned());
            graph.nodes.extend(m.consumes.iter().cloned());
            for c in &m.consumes {
                for p in &m.produces {
                    graph.add_edge(c, p);
                }
            }
        }
        for r in &covenant.routes {
            graph.nodes.insert(r.source.clone());
            for t in &r.targets {
                graph.nodes.insert(t.clone());
                graph.add_edge(&r.source, t);
            }
        }
        for t in &covenant.terminals {
            graph.nodes.insert(t.kind.clone());
        }
        graph
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    pub fn nodes(&self) -> &BTreeSet<String> {
        &self.nodes
    }

    pub fn successors(&self, kind: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(kind)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Everything reachable from `roots` (roots included) along edges.
    pub fn reachable_from<'a, I>(&self, roots: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        walk(roots, |k| self.successors(k).map(str::to_string).collect())
    }

    /// Everything that can reach one of `targets` (targets included).
    pub fn reaching<'a, I>(&self, targets: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut reverse: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (from, tos) in &self.edges {
            for to in tos {
                reverse.entry(to.as_str()).or_default().push(from.clone());
            }
        }
        walk(targets, |k| reverse.get(k).cloned().unwrap_or_default())
    }
}

fn walk<'a, I, F>(start: I, next: F) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a String>,
    F: Fn(&str) -> Vec<String>,
{
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    for s in start {
        if seen.insert(s.clone()) {
            queue.push_back(s.clone());
        }
    }
    while let Some(k) = queue.pop_front() {
        for n in next(&k) {
            if seen.insert(n.clone()) {
                queue.push_back(n);
            }
        }
    }
    seen
}
