use covenant::{
    load_covenant_from_str, BranchManifest, Covenant, IslandReason, Violation,
};

fn chat_covenant() -> Covenant {
    Covenant::new("chat")
        .manifest(
            BranchManifest::new("gateway")
                .produces("afferent")
                .consumes("efferent"),
        )
        .manifest(
            BranchManifest::new("core")
                .consumes("afferent")
                .produces("efferent")
                .produces("summary")
                .requires_service("window-engine"),
        )
        .route("afferent", ["efferent"])
        .terminal("efferent")
        .terminal("summary")
        .source("afferent")
}

#[test]
fn well_formed_covenant_passes() {
    let graph = chat_covenant().validate().expect("valid covenant");
    assert!(graph.nodes().contains("afferent"));
    assert!(graph.nodes().contains("summary"));
    assert!(graph.successors("afferent").any(|k| k == "efferent"));
}

#[test]
fn unrouted_product_is_exactly_one_dead_letter() {
    let cov = Covenant::new("tiny").manifest(BranchManifest::new("emitter").produces("X"));
    let err = cov.validate().expect_err("dead letter must fail");

    assert_eq!(err.violations.len(), 1, "got {:?}", err.violations);
    assert!(err.violations[0].is_dead_letter());
    assert_eq!(err.violations[0].kind(), "X");

    let msg = err.to_string();
    assert!(msg.contains("X"));
    assert!(msg.contains("dead letter"));
}

#[test]
fn route_plus_terminal_is_ambiguous() {
    let cov = chat_covenant().terminal("afferent");
    let err = cov.validate().expect_err("ambiguous must fail");
    let found: Vec<&Violation> = err.violations_for("afferent").collect();
    assert_eq!(found.len(), 1);
    match found[0] {
        Violation::AmbiguousDisposition { dispositions, .. } => {
            assert_eq!(dispositions.len(), 2);
            assert!(dispositions.iter().any(|d| d == "terminal"));
        }
        other => panic!("expected ambiguous disposition, got {other:?}"),
    }
}

#[test]
fn consumer_of_unknown_type_is_orphaned() {
    let cov = chat_covenant().manifest(BranchManifest::new("tools").consumes("tool_call"));
    let err = cov.validate().expect_err("orphan must fail");
    assert_eq!(err.violations.len(), 1, "got {:?}", err.violations);
    assert!(err.violations[0].is_orphan());
    assert!(err.to_string().contains("tool_call"));
}

#[test]
fn route_target_without_producer_is_orphaned() {
    let cov = Covenant::new("routes")
        .manifest(BranchManifest::new("a").produces("ping"))
        .route("ping", ["pong"]);
    let err = cov.validate().expect_err("orphan target");
    let orphans: Vec<_> = err.violations.iter().filter(|v| v.is_orphan()).collect();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].kind(), "pong");
}

#[test]
fn self_contained_loop_is_an_island() {
    let cov = chat_covenant()
        .manifest(BranchManifest::new("echo").consumes("ghost").produces("ghost"))
        .terminal("ghost");
    let err = cov.validate().expect_err("island must fail");
    assert_eq!(
        err.violations,
        vec![Violation::Island {
            kind: "ghost".into(),
            reason: IslandReason::UnreachableFromSource,
        }]
    );
}

#[test]
fn external_types_count_as_produced() {
    let cov = Covenant::new("ext")
        .external("tick")
        .manifest(BranchManifest::new("clock").consumes("tick"))
        .terminal("tick");
    cov.validate().expect("external tick is produced outside the graph");
}

#[test]
fn all_violations_are_collected_in_one_report() {
    let cov = Covenant::new("broken")
        .manifest(BranchManifest::new("a").produces("lost").produces("twice"))
        .manifest(BranchManifest::new("b").consumes("nowhere"))
        .route("twice", ["lost"])
        .terminal("twice");
    let err = cov.validate().expect_err("broken");

    assert!(err.violations.iter().any(|v| v.is_dead_letter() && v.kind() == "lost"));
    assert!(err
        .violations
        .iter()
        .any(|v| matches!(v, Violation::AmbiguousDisposition { kind, .. } if kind == "twice")));
    assert!(err.violations.iter().any(|v| v.is_orphan() && v.kind() == "nowhere"));
    assert!(!err.violations.iter().any(|v| v.is_island()));
}

#[test]
fn covenant_loads_from_toml() -> anyhow::Result<()> {
    let text = r#"
        name = "toml-chat"
        sources = ["afferent"]

        [[manifests]]
        name = "gateway"
        produces = ["afferent"]
        consumes = ["efferent"]

        [[manifests]]
        name = "core"
        produces = ["efferent"]
        consumes = ["afferent"]

        [[routes]]
        source = "afferent"
        targets = ["efferent"]

        [[terminals]]
        kind = "efferent"
        reason = "delivered to the gateway"
    "#;
    let cov = load_covenant_from_str(text)?;
    assert_eq!(cov.name, "toml-chat");
    assert_eq!(cov.manifests.len(), 2);
    cov.validate()?;
    Ok(())
}
