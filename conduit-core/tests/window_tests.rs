use conduit_core::config::WindowConfig;
use conduit_core::services::{
    BoldSpanBoundary, BoundaryPolicy, BoundaryShatter, CompositeWindowPolicy, ConcatTransform, FlushCause, Flushed,
    MaxChunksPolicy, MaxLengthPolicy, RouteContext, Stage, WindowEngine, WindowError, WindowPolicy, WindowStage,
    WindowTransform,
};
use conduit_core::{Entry, Reagent, Record, kinds};
use tokio_util::sync::CancellationToken;

fn summaries(policy: impl WindowPolicy<Entry> + 'static) -> WindowEngine<Entry, Entry> {
    WindowEngine::new(policy, ConcatTransform::summaries())
}

#[test]
fn max_length_ten_emits_once_for_two_chunks() {
    let mut engine = summaries(MaxLengthPolicy::new(10));
    let first = engine.push(Entry::chunk("model", "t1", "abcde")).unwrap();
    assert!(first.is_none());

    let out = engine.push(Entry::chunk("model", "t1", "fghij")).unwrap().expect("one flush");
    assert_eq!(out.kind(), kinds::SUMMARY);
    assert_eq!(out.payload(), "abcdefghij");
    assert_eq!(out.sender(), "model");
    assert_eq!(engine.flush_count(), 1);
    assert_eq!(engine.pending("t1"), 0);
}

#[test]
fn completion_flushes_everything_exactly_once() {
    let mut engine = summaries(MaxLengthPolicy::new(1_000));
    let parts = ["the ", "quick ", "brown ", "fox"];
    for p in parts {
        assert!(engine.push(Entry::chunk("m", "t", p)).unwrap().is_none());
    }
    let flushed = engine.complete("t").unwrap();
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].payload(), parts.concat());

    // nothing is counted twice
    assert!(engine.complete("t").unwrap().is_empty());
    assert_eq!(engine.flush_count(), 1);
}

#[test]
fn multibyte_text_counts_chars_not_bytes() {
    let mut engine = summaries(MaxLengthPolicy::new(4));
    assert!(engine.push(Entry::chunk("m", "t", "héé")).unwrap().is_none());
    assert!(engine.push(Entry::chunk("m", "t", "ü")).unwrap().is_some());
}

#[test]
fn configured_policy_composes_enabled_members() {
    let cfg = WindowConfig {
        max_chars: 8,
        max_chunks: 3,
        boundary_enabled: false,
        boundary_lookback: 0,
    };
    let mut engine = summaries(cfg.policy::<Entry>());
    engine.push(Entry::chunk("m", "t", "a")).unwrap();
    engine.push(Entry::chunk("m", "t", "b")).unwrap();
    let out = engine.push(Entry::chunk("m", "t", "c")).unwrap().expect("chunk cap");
    assert_eq!(out.payload(), "abc");

    let out = engine.push(Entry::chunk("m", "t", "12345678")).unwrap().expect("length cap");
    assert_eq!(out.payload(), "12345678");
}

#[test]
fn composite_or_holds_over_a_sequence() {
    let a = MaxLengthPolicy::new(6);
    let b = BoundaryPolicy::new(BoldSpanBoundary);
    let both = CompositeWindowPolicy::new().with(a).with(b.clone());

    let mut engine_a = summaries(a);
    let mut engine_b = summaries(b);
    let mut engine_both = summaries(both);
    for p in ["ab", "c **H**\n\n", "x", "yyyyyyy"] {
        let fired_a = engine_a.push(Entry::chunk("m", "t", p)).unwrap().is_some();
        let fired_b = engine_b.push(Entry::chunk("m", "t", p)).unwrap().is_some();
        let fired_both = engine_both.push(Entry::chunk("m", "t", p)).unwrap().is_some();
        if fired_a == fired_b {
            assert_eq!(fired_both, fired_a, "chunk {p:?}");
        } else {
            assert!(fired_both, "chunk {p:?}");
        }
        // keep the three windows in the same state
        if fired_a || fired_b || fired_both {
            engine_a.complete("t").unwrap();
            engine_b.complete("t").unwrap();
            engine_both.complete("t").unwrap();
        }
    }
}

struct AlwaysCarry;

impl WindowTransform<Entry, Entry> for AlwaysCarry {
    fn flush(&self, turn: &str, chunks: Vec<Entry>, _cause: FlushCause) -> Result<Flushed<Entry, Entry>, WindowError> {
        let first = chunks.first().cloned().ok_or(WindowError::Empty {
            turn: turn.to_string(),
        })?;
        Ok(Flushed {
            output: Entry::summary(first.sender(), turn, "part"),
            remainder: Some(first.with_payload("again".to_string())),
        })
    }
}

#[test]
fn runaway_remainder_is_an_error_not_a_hang() {
    let mut engine = WindowEngine::new(MaxLengthPolicy::new(1_000), AlwaysCarry);
    engine.push(Entry::chunk("m", "t", "x")).unwrap();
    assert!(matches!(
        engine.complete("t"),
        Err(WindowError::UnboundedRemainder { .. })
    ));
    assert_eq!(engine.pending("t"), 0);
}

#[tokio::test]
async fn stage_shatters_then_buffers_and_flushes_on_completion() {
    let engine = WindowEngine::new(
        BoundaryPolicy::new(BoldSpanBoundary),
        ConcatTransform::summaries().split_at_boundary(BoldSpanBoundary),
    );
    let mut stage =
        WindowStage::new(kinds::CHUNK, kinds::COMPLETION, engine).with_shatter(BoundaryShatter::default());
    let ctx = RouteContext::new("window", CancellationToken::new());

    assert!(stage.accepts(&Entry::chunk("m", "t", "")));
    assert!(stage.accepts(&Entry::completion("m", "t")));
    assert!(!stage.accepts(&Entry::draft("m", "t", "")));

    let out = stage
        .process(Entry::chunk("m", "t", "Intro text. "), Reagent(0), &ctx)
        .await
        .unwrap();
    assert!(out.is_empty());

    // shattered into "Done. " and "**Plan**\n\nstep one"; the second half trips the policy
    let out = stage
        .process(Entry::chunk("m", "t", "Done. **Plan**\n\nstep one"), Reagent(1), &ctx)
        .await
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].payload(), "Intro text. Done. ");

    let out = stage
        .process(Entry::completion("m", "t"), Reagent(2), &ctx)
        .await
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].payload(), "**Plan**\n\nstep one");
    assert_eq!(stage.engine().pending("t"), 0);
}
