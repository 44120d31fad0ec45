use chan_core::config::{ChanConfig, SegAlgo, ZsAlgo};
use chan_core::market::entity::Bar;
use chan_core::market::error::DataError;
use chan_core::structure::entity::{StructureRecord, ZoneLevel};
use chan_core::structure::error::AnalysisError;
use chan_core::structure::port::Swing;
use chan_core::test_utils::{bars_from_ranges, random_walk, ts};
use chan_engine::AnalysisContext;

/// # Summary
/// 覆盖各算法组合的配置集合。
fn configs() -> Vec<ChanConfig> {
    let mut out = Vec::new();
    for seg_algo in [SegAlgo::Chan, SegAlgo::OnePlusOne, SegAlgo::Break] {
        for (zs_algo, zs_level) in [
            (ZsAlgo::Normal, ZoneLevel::Stroke),
            (ZsAlgo::OverSeg, ZoneLevel::Stroke),
            (ZsAlgo::Auto, ZoneLevel::Segment),
        ] {
            for bi_strict in [true, false] {
                out.push(ChanConfig {
                    bi_strict,
                    seg_algo,
                    zs_algo,
                    zs_level,
                    ..ChanConfig::default()
                });
            }
        }
    }
    out
}

fn replay(config: &ChanConfig, bars: &[Bar]) -> anyhow::Result<StructureRecord> {
    let mut ctx = AnalysisContext::new(config.clone())?;
    for bar in bars {
        ctx.feed(bar.clone())?;
    }
    Ok(ctx.record())
}

fn zone_bounds<S: Swing>(swings: &[S], members: &[usize]) -> (f64, f64) {
    members.iter().filter_map(|&m| swings.get(m)).fold((f64::MIN, f64::MAX), |(lo, hi), s| {
        (lo.max(s.low()), hi.min(s.high()))
    })
}

fn assert_structure(record: &StructureRecord) {
    for w in record.merged.windows(2) {
        assert!(
            !w[0].is_inclusive(w[1].high, w[1].low),
            "merged {} includes {}",
            w[0].idx,
            w[1].idx
        );
    }
    for w in record.strokes.windows(2) {
        assert_ne!(w[0].direction, w[1].direction);
        assert_eq!(w[0].end, w[1].begin);
        assert!(w[0].confirmed);
    }
    for w in record.segments.windows(2) {
        assert_ne!(w[0].direction, w[1].direction);
        assert_eq!(w[0].end_stroke + 1, w[1].begin_stroke);
    }
    for zone in &record.zones {
        let bounds = match zone.level {
            ZoneLevel::Stroke => zone_bounds(&record.strokes, &zone.members),
            ZoneLevel::Segment => zone_bounds(&record.segments, &zone.members),
        };
        assert_eq!(bounds, (zone.low, zone.high), "zone {}", zone.idx);
        assert!(zone.low < zone.high);
    }
}

#[test]
fn test_replay_is_deterministic() -> anyhow::Result<()> {
    let bars = random_walk(42, 800);
    for config in configs() {
        let a = serde_json::to_string(&replay(&config, &bars)?)?;
        let b = serde_json::to_string(&replay(&config, &bars)?)?;
        assert_eq!(a, b);
    }
    Ok(())
}

#[test]
fn test_structural_invariants_hold() -> anyhow::Result<()> {
    for seed in [1, 7, 99] {
        let bars = random_walk(seed, 600);
        for config in configs() {
            let record = replay(&config, &bars)?;
            assert_structure(&record);
            assert!(!record.strokes.is_empty());
        }
    }
    Ok(())
}

#[test]
fn test_confirmed_structures_never_revised() -> anyhow::Result<()> {
    let bars = random_walk(2024, 700);
    for config in configs() {
        let mut ctx = AnalysisContext::new(config)?;
        let mut prev = ctx.record();
        for bar in &bars {
            ctx.feed(bar.clone())?;
            let next = ctx.record();

            let strokes = prev.strokes.iter().take_while(|s| s.confirmed).count();
            assert_eq!(prev.strokes[..strokes], next.strokes[..strokes]);
            let segments = prev.segments.iter().take_while(|s| s.confirmed).count();
            assert_eq!(prev.segments[..segments], next.segments[..segments]);
            let zones = prev.zones.iter().take_while(|z| z.confirmed).count();
            assert_eq!(prev.zones[..zones], next.zones[..zones]);
            for signal in prev.signals.iter().filter(|s| s.confirmed) {
                assert!(next.signals.contains(signal), "signal {:?} revised", signal.key());
            }
            prev = next;
        }
    }
    Ok(())
}

#[test]
fn test_monotonic_rise_produces_no_strokes() -> anyhow::Result<()> {
    let mut ctx = AnalysisContext::new(ChanConfig::default())?;
    let ranges: Vec<(f64, f64)> = (0..12)
        .map(|i| (10.0 + f64::from(i), 12.0 + f64::from(i)))
        .collect();
    for bar in bars_from_ranges(&ranges) {
        ctx.feed(bar)?;
        assert!(ctx.strokes().is_empty());
    }
    assert_eq!(ctx.merged().len(), ranges.len());

    // 一根反转 K 线只形成顶分型，还不足以成笔
    ctx.feed(Bar::new(ts(12), 22.0, 22.0, 19.0, 19.0, 1.0))?;
    assert!(ctx.strokes().is_empty());
    Ok(())
}

#[test]
fn test_inverted_bar_rejected_without_side_effects() -> anyhow::Result<()> {
    let bars = random_walk(5, 300);
    let mut ctx = AnalysisContext::new(ChanConfig::default())?;
    ctx.load(bars)?;
    let before = serde_json::to_string(&ctx.record())?;

    let err = ctx.feed(Bar::new(ts(300), 100.0, 99.0, 101.0, 100.0, 0.0)).unwrap_err();
    assert!(matches!(err, AnalysisError::Data(DataError::InvertedRange { .. })));
    assert_eq!(serde_json::to_string(&ctx.record())?, before);

    let err = ctx.feed(Bar::new(ts(301), f64::NAN, 101.0, 99.0, 100.0, 0.0)).unwrap_err();
    assert!(matches!(err, AnalysisError::Data(DataError::NonFinite { field: "open", .. })));
    assert_eq!(serde_json::to_string(&ctx.record())?, before);
    Ok(())
}

#[test]
fn test_signals_reference_existing_swings() -> anyhow::Result<()> {
    let config = ChanConfig {
        divergence_rate: f64::INFINITY,
        ..ChanConfig::default()
    };
    let record = replay(&config, &random_walk(11, 900))?;
    assert!(!record.signals.is_empty());
    for signal in &record.signals {
        let stroke = &record.strokes[signal.swing];
        assert_eq!(signal.price, stroke.end_price);
        assert_eq!(
            signal.is_buy,
            stroke.direction == chan_core::structure::entity::Direction::Down
        );
        if let Some(zone) = signal.zone {
            assert!(zone < record.zones.len());
        }
    }
    Ok(())
}

#[test]
fn test_bs_type_restricts_output() -> anyhow::Result<()> {
    let config = ChanConfig::from_pairs(&[("bs_type", "2,3a"), ("divergence_rate", "inf")])?;
    let record = replay(&config, &random_walk(11, 900))?;
    assert!(record.signals.iter().all(|s| config.emits(s.kind)));
    Ok(())
}
