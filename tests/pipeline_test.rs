//! Synthetic frames through the worker pool and the shot session.

use std::sync::Arc;

use lanetrack::synthetic::{Disc, Scene, ShotScript, BALL_COLOR, LANE_COLOR, MARKER_COLOR};
use lanetrack::{
    BallProfile, CalibrationProfile, DetectionPool, FrameAnalyzer, Hsv, HsvTarget, PipelineConfig,
    ShotEnd, ShotReport, ShotSession,
};

fn script() -> ShotScript {
    ShotScript {
        width: 240,
        height: 600,
        from: (120.0, 570.0),
        to: (105.0, 50.0),
        radius: 12.0,
        ..ShotScript::default()
    }
}

fn config(script: &ShotScript) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.detector.ideal_area_fraction = script.ball_area_fraction();
    config.runtime.drop_late_frames = false;
    config.runtime.queue_depth = 8;
    config
}

fn profile(script: &ShotScript) -> BallProfile {
    let target = |rgb| HsvTarget::new(Hsv::from_rgb(rgb)).with_tolerances(15.0, 0.25, 0.25);

    BallProfile {
        ball: target(script.ball_color),
        marker: script.marker_color.map(target),
    }
}

/// Foul line one radius behind the release point, pins where the roll ends.
fn calibration(script: &ShotScript) -> CalibrationProfile {
    let foul = script.from.1 as f64 + script.radius as f64;
    let ppf = (foul - script.to.1 as f64) / 60.0;
    CalibrationProfile::new(foul, 0.0, script.width as f64, ppf)
}

/// Every frame is kept: the producer waits whenever the pool is full.
fn run(script: &ShotScript) -> Vec<ShotReport> {
    run_with(script, config(script))
}

fn run_with(script: &ShotScript, config: PipelineConfig) -> Vec<ShotReport> {
    let analyzer = Arc::new(FrameAnalyzer::new(&config, profile(script)).unwrap());
    let mut pool = DetectionPool::new(analyzer, &config.runtime);
    let mut session = ShotSession::new(&config, Some(calibration(script))).unwrap();

    // never more in flight than the queue holds, so nothing is refused
    let capacity = config.runtime.queue_depth as u64;
    let mut reports = Vec::new();

    for frame in script.render() {
        while pool.in_flight() >= capacity {
            let outcome = pool.recv().unwrap();
            reports.extend(session.feed(&outcome).unwrap());
        }

        assert!(pool.submit(Arc::new(frame)));
    }

    for outcome in pool.finish() {
        reports.extend(session.feed(&outcome).unwrap());
    }
    reports.extend(session.stop());

    reports
}

#[test]
fn synthetic_shot_reaches_the_pins() {
    let script = script();
    let reports = run(&script);
    assert_eq!(reports.len(), 1, "{:?}", reports.iter().map(|r| r.end).collect::<Vec<_>>());

    let report = &reports[0];
    assert_eq!(report.end, ShotEnd::ReachedPins);
    assert_eq!(report.dropped_frames, 0);
    assert!(report.trajectory.iter().all(|p| !p.interpolated));

    let frames: Vec<u64> = report.trajectory.iter().map(|p| p.frame_index).collect();
    assert!(frames.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(frames[0], 0);

    let last = report.trajectory.last().unwrap();
    assert!(last.distance_ft.unwrap() >= 55.0);

    // 520 px at 8.87 px/ft in 239/120 s is 29.4 ft/s
    let speed = report.metrics.impact_speed_mph.unwrap();
    assert!(speed > 19.0 && speed < 21.2, "speed {}", speed);

    let rpm = report.metrics.rev_rate_rpm.unwrap();
    assert!((rpm - script.rpm).abs() < 15.0, "rpm {}", rpm);
    assert!(report.rotations.unwrap() > 1.0);

    assert!(report.metrics.entry_angle_deg.is_some());
    assert!(report.metrics.strike_probability.is_some());
}

#[test]
fn hidden_frames_are_filled_in() {
    let script = ShotScript {
        hidden: vec![60, 61, 62, 63],
        ..script()
    };

    let reports = run(&script);
    assert_eq!(reports.len(), 1);

    let report = &reports[0];
    assert_eq!(report.end, ShotEnd::ReachedPins);

    let filled: Vec<u64> = report
        .trajectory
        .iter()
        .filter(|p| p.interpolated)
        .map(|p| p.frame_index)
        .collect();
    assert_eq!(filled, vec![60, 61, 62, 63]);

    for p in report.trajectory.iter().filter(|p| p.interpolated) {
        let (x, y) = script.center(p.frame_index as usize);
        assert!((p.x - x).abs() < 2.0 && (p.y - y).abs() < 2.0);
        assert!(p.confidence < 0.5);
    }
}

#[test]
fn ball_that_vanishes_is_lost() {
    let script = ShotScript {
        hidden: (100..240).collect(),
        ..script()
    };

    let reports = run(&script);
    assert_eq!(reports.len(), 1);

    let report = &reports[0];
    assert_eq!(report.end, ShotEnd::Lost);
    assert_eq!(report.trajectory.len(), 100);

    // never got near the pins
    assert!(report.metrics.entry_angle_deg.is_none());
    assert!(report.metrics.pocket_board.is_none());
    assert!(report.metrics.launch_speed_mph.is_some());
}

#[test]
fn no_ball_no_report() {
    let script = ShotScript {
        hidden: (0..240).collect(),
        ..script()
    };

    assert!(run(&script).is_empty());
}

fn full_hd() -> ShotScript {
    ShotScript {
        width: 1920,
        height: 1080,
        frames: 120,
        from: (960.0, 1030.0),
        to: (900.0, 80.0),
        radius: 36.0,
        ..ShotScript::default()
    }
}

#[test]
#[cfg_attr(debug_assertions, ignore = "timing needs an optimized build")]
fn full_hd_frame_fits_the_budget() {
    let frame = Scene::new(1920, 1080)
        .with_background(LANE_COLOR)
        .with_disc(Disc::new(900.0, 700.0, 40.0, BALL_COLOR))
        .with_disc(Disc::new(920.0, 700.0, 12.0, MARKER_COLOR))
        .render(0, 0.0);

    let analyzer = FrameAnalyzer::new(&PipelineConfig::default(), profile(&full_hd())).unwrap();

    // the first call also starts the rayon pool
    assert_eq!(analyzer.analyze(&frame).candidates.len(), 1);

    for _ in 0..10 {
        let analysis = analyzer.analyze(&frame);
        assert_eq!(analysis.candidates.len(), 1);
        assert!(analysis.candidates[0].marker.is_some());
        assert!(
            !analyzer.over_budget(&analysis),
            "took {:?} of {:?}",
            analysis.elapsed,
            analyzer.budget()
        );
    }
}

#[test]
#[cfg_attr(debug_assertions, ignore = "timing needs an optimized build")]
fn full_hd_shot_is_tracked_with_late_frame_dropping() {
    let script = full_hd();

    let mut config = PipelineConfig::default();
    config.detector.ideal_area_fraction = script.ball_area_fraction();
    assert!(config.runtime.drop_late_frames);

    let reports = run_with(&script, config);
    assert_eq!(reports.len(), 1);

    let report = &reports[0];
    assert_eq!(report.end, ShotEnd::ReachedPins);
    assert!(report.dropped_frames * 10 <= report.frames, "dropped {}", report.dropped_frames);
    assert!(report.metrics.impact_speed_mph.is_some());
    assert!(report.metrics.rev_rate_rpm.is_some());
}
