use std::sync::Arc;
use std::time::Duration;

use conduit_core::covenant::{BranchManifest, Covenant};
use conduit_core::services::{FnTransmuter, RouteError, RouteRegistry, TransformError};
use conduit_core::{Entry, Journal, MemoryJournal, Reagent, Record, kinds};
use futures_util::StreamExt;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn to_efferent(entry: Entry, _: Reagent) -> Result<Entry, TransformError> {
    match entry {
        Entry::Afferent { sender, payload, .. } => Ok(Entry::efferent(sender, payload.to_uppercase())),
        other => Err(TransformError::UnexpectedKind(other.kind())),
    }
}

fn base() -> Covenant {
    Covenant::new("echo")
        .source(kinds::AFFERENT)
        .external(kinds::AFFERENT)
        .manifest(
            BranchManifest::new("echo-core")
                .consumes(kinds::AFFERENT)
                .produces(kinds::EFFERENT),
        )
}

fn registry() -> RouteRegistry<Entry, Entry> {
    let mut routes = RouteRegistry::new();
    routes
        .transmute(kinds::AFFERENT, kinds::EFFERENT, || FnTransmuter(to_efferent))
        .unwrap()
        .terminal(kinds::EFFERENT)
        .unwrap();
    routes
}

#[test]
fn registry_renders_routes_and_terminals_into_the_covenant() {
    let covenant = registry().covenant(base());
    assert_eq!(covenant.routes.len(), 1);
    assert_eq!(covenant.routes[0].source, kinds::AFFERENT);
    assert!(covenant.routes[0].targets.contains(kinds::EFFERENT));
    assert_eq!(covenant.terminals.len(), 1);
    assert!(covenant.validate().is_ok());
}

#[test]
fn duplicate_and_conflicting_registrations_are_rejected() {
    let mut routes = registry();
    let dup = routes.transmute(kinds::AFFERENT, kinds::EFFERENT, || FnTransmuter(to_efferent));
    assert!(matches!(dup, Err(RouteError::Duplicate { .. })));
    assert!(matches!(
        routes.terminal(kinds::AFFERENT),
        Err(RouteError::TerminalConflict(kinds::AFFERENT))
    ));
}

#[test]
fn invalid_covenant_builds_no_pumps() {
    let source: Arc<MemoryJournal<Entry>> = MemoryJournal::shared("in");
    let target: Arc<MemoryJournal<Entry>> = MemoryJournal::shared("out");

    // summary is produced but has neither a route nor a terminal
    let leaky = base().manifest(BranchManifest::new("summarizer").consumes(kinds::CHUNK).produces(kinds::SUMMARY));
    let err = match registry().build(leaky, source, target) {
        Err(RouteError::Covenant(err)) => err,
        Err(other) => panic!("unexpected error: {other}"),
        Ok(pumps) => panic!("{} pumps built for an invalid covenant", pumps.len()),
    };
    let text = err.to_string();
    assert!(text.contains("summary"), "{text}");
    assert!(text.contains("dead letter"), "{text}");
    assert!(err.violations.iter().any(|v| v.is_orphan() && v.kind() == kinds::CHUNK));
}

#[tokio::test]
async fn valid_covenant_builds_running_pumps() {
    let source: Arc<MemoryJournal<Entry>> = MemoryJournal::shared("in");
    let target: Arc<MemoryJournal<Entry>> = MemoryJournal::shared("out");
    source.append(Entry::afferent("user", "hi")).await.unwrap();
    source.append(Entry::chunk("m", "t", "skip")).await.unwrap();
    source.close();

    let pumps = registry().build(base(), source.clone(), target.clone()).unwrap();
    assert_eq!(pumps.len(), 1);
    assert_eq!(pumps[0].name(), "echo:afferent->efferent");

    for pump in pumps {
        let report = pump.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.written, 1);
    }

    let mut tail = target.tail_from(0, CancellationToken::new());
    let got = timeout(Duration::from_secs(5), tail.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(got.entry, Entry::efferent("user", "HI"));
}
