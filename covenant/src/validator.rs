use crate::error::{CovenantError, IslandReason, Violation};
use crate::graph::CovenantGraph;
use crate::types::Covenant;
use std::collections::{BTreeMap, BTreeSet};

const EXTERNAL: &str = "<external>";

// ----------------- Core -----------------

/// Check a covenant once, before anything is wired. Returns the graph on
/// success, or every violation at once.
pub fn validate(covenant: &Covenant) -> Result<CovenantGraph, CovenantError> {
    let graph = CovenantGraph::from_covenant(covenant);
    let violations = collect_violations(covenant, &graph);
    if violations.is_empty() {
        tracing::debug!(
            covenant = %covenant.name,
            nodes = graph.nodes().len(),
            edges = graph.edge_count(),
            "covenant validated"
        );
        return Ok(graph);
    }
    tracing::warn!(
        covenant = %covenant.name,
        violations = violations.len(),
        "covenant rejected"
    );
    Err(CovenantError::new(covenant.name.clone(), violations))
}

pub fn collect_violations(covenant: &Covenant, graph: &CovenantGraph) -> Vec<Violation> {
    let producers = producers_of(covenant);
    let mut out: Vec<Violation> = Vec::new();
    let mut reported: BTreeSet<String> = BTreeSet::new();

    // Pass 1: dispositions for every produced type
    let dispositions = dispositions_of(covenant);
    for (kind, by) in &producers {
        match dispositions.get(kind.as_str()).map(Vec::len).unwrap_or(0) {
            0 => {
                out.push(Violation::DeadLetter {
                    kind: kind.clone(),
                    producers: by.clone(),
                });
                reported.insert(kind.clone());
            }
            1 => {}
            _ => {
                out.push(Violation::AmbiguousDisposition {
                    kind: kind.clone(),
                    dispositions: dispositions[kind.as_str()].clone(),
                });
                reported.insert(kind.clone());
            }
        }
    }

    // Pass 2: everything consumed must come from somewhere
    for (kind, by) in consumers_of(covenant) {
        if producers.contains_key(&kind) {
            continue;
        }
        reported.insert(kind.clone());
        out.push(Violation::OrphanedConsumer {
            kind,
            consumers: by,
        });
    }

    // Pass 3: islands. Types explained above count as both root and sink so
    // one defect is not reported again for everything downstream of it.
    let mut roots = roots_of(covenant, &producers);
    let mut sinks = sinks_of(covenant);
    roots.extend(reported.iter().cloned());
    sinks.extend(reported.iter().cloned());
    let forward = graph.reachable_from(roots.iter());
    let backward = graph.reaching(sinks.iter());
    for kind in graph.nodes() {
        if reported.contains(kind) {
            continue;
        }
        let reason = match (forward.contains(kind), backward.contains(kind)) {
            (true, true) => continue,
            (false, true) => IslandReason::UnreachableFromSource,
            (true, false) => IslandReason::CannotReachSink,
            (false, false) => IslandReason::Detached,
        };
        out.push(Violation::Island {
            kind: kind.clone(),
            reason,
        });
    }

    out.sort();
    out
}

// ----------------- Helpers -----------------

fn producers_of(covenant: &Covenant) -> BTreeMap<String, BTreeSet<String>> {
    let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for m in &covenant.manifests {
        for p in &m.produces {
            map.entry(p.clone()).or_default().insert(m.name.clone());
        }
    }
    for e in &covenant.externals {
        map.entry(e.clone()).or_default().insert(EXTERNAL.to_string());
    }
    map
}

fn dispositions_of(covenant: &Covenant) -> BTreeMap<&str, Vec<String>> {
    let mut map: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for r in &covenant.routes {
        let targets = r.targets.iter().cloned().collect::<Vec<_>>().join(", ");
        map.entry(r.source.as_str())
            .or_default()
            .push(format!("route -> [{targets}]"));
    }
    for t in &covenant.terminals {
        map.entry(t.kind.as_str())
            .or_default()
            .push("terminal".to_string());
    }
    map
}

fn consumers_of(covenant: &Covenant) -> BTreeMap<String, BTreeSet<String>> {
    let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for m in &covenant.manifests {
        for c in &m.consumes {
            map.entry(c.clone()).or_default().insert(m.name.clone());
        }
    }
    for r in &covenant.routes {
        map.entry(r.source.clone())
            .or_default()
            .insert(format!("route:{}", r.source));
        for t in &r.targets {
            map.entry(t.clone())
                .or_default()
                .insert(format!("route:{}", r.source));
        }
    }
    for t in &covenant.terminals {
        map.entry(t.kind.clone())
            .or_default()
            .insert("terminal".to_string());
    }
    map
}

/// Declared sources, externals, and whatever branches emit unprompted.
/// With none of those every produced type counts as a root.
fn roots_of(covenant: &Covenant, producers: &BTreeMap<String, BTreeSet<String>>) -> BTreeSet<String> {
    let mut roots: BTreeSet<String> = covenant.sources.clone();
    roots.extend(covenant.externals.iter().cloned());
    for m in covenant.manifests.iter().filter(|m| m.consumes.is_empty()) {
        roots.extend(m.produces.iter().cloned());
    }
    if roots.is_empty() {
        roots.extend(producers.keys().cloned());
    }
    roots
}

fn sinks_of(covenant: &Covenant) -> BTreeSet<String> {
    let mut sinks: BTreeSet<String> = covenant.sinks.clone();
    sinks.extend(covenant.terminals.iter().map(|t| t.kind.clone()));
    for m in &covenant.manifests {
        sinks.extend(m.consumes.iter().cloned());
    }
    sinks
}
