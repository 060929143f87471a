use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use perimeter_watch::config::ReportFormat;
use perimeter_watch::{FenceSide, MatchPolicy, PerimeterConfig, PerimeterError, ThreatLevel};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PIDS_CONFIG",
        "PIDS_SOURCE",
        "PIDS_FENCE_Y",
        "PIDS_MIN_AREA",
        "PIDS_LOITER_SECS",
        "PIDS_FUSION_ALPHA",
        "PIDS_OUTPUT_DIR",
        "PIDS_FONT",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": "rtsp://10.0.0.7:554/gate",
        "classifier": "heuristic",
        "fence": { "y": 300, "approach_band": 120, "protected_side": "above" },
        "detection": { "min_area": 2000, "loiter_secs": 8, "fusion_alpha": 0.6 },
        "capture": { "width": 800, "height": 600, "fps": 15 },
        "output": { "root": "/var/lib/pids" },
        "tracking": { "matching": "per_region", "match_distance": 60.0, "max_missed_frames": 3 },
        "snapshots": { "enabled": false, "min_threat": "HIGH" },
        "display": { "path": "/tmp/cockpit.jpg", "every_n_frames": 2 },
        "report": { "format": "sqlite" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("PIDS_CONFIG", file.path());
    std::env::set_var("PIDS_FENCE_Y", "320");
    std::env::set_var("PIDS_LOITER_SECS", "12");
    std::env::set_var("PIDS_FONT", "/usr/share/fonts/DejaVuSans.ttf");

    let cfg = PerimeterConfig::load().expect("load config");

    assert_eq!(cfg.source, "rtsp://10.0.0.7:554/gate");
    assert_eq!(cfg.fence.y, 320);
    assert_eq!(cfg.fence.approach_band, 120);
    assert_eq!(cfg.fence.protected_side, FenceSide::Above);
    assert_eq!(cfg.detection.min_area, 2000);
    assert_eq!(cfg.detection.loiter, Duration::from_secs(12));
    assert_eq!(cfg.detection.fusion_alpha, 0.6);
    assert_eq!((cfg.capture.width, cfg.capture.height, cfg.capture.fps), (800, 600, 15));
    assert_eq!(cfg.output_root, PathBuf::from("/var/lib/pids"));
    assert_eq!(cfg.tracking.matching, MatchPolicy::PerRegion);
    assert_eq!(cfg.tracking.max_missed_frames, 3);
    assert_eq!(cfg.tracking.trail_capacity, 20);
    assert!(!cfg.snapshots.enabled);
    assert_eq!(cfg.snapshots.min_threat, ThreatLevel::High);
    assert_eq!(cfg.display.every_n_frames, 2);
    assert_eq!(
        cfg.display.font,
        Some(PathBuf::from("/usr/share/fonts/DejaVuSans.ttf"))
    );
    assert_eq!(cfg.report.format, ReportFormat::Sqlite);

    clear_env();
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PerimeterConfig::load().expect("load defaults");
    assert_eq!(cfg.source, "stub://perimeter");
    assert_eq!(cfg.classifier, "heuristic");
    assert_eq!(cfg.fence.y, 260);
    assert_eq!(cfg.fence.protected_side, FenceSide::Below);
    assert_eq!(cfg.output_root, PathBuf::from("."));
    assert!(cfg.display.font.is_none());
}

#[test]
fn malformed_env_override_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PIDS_MIN_AREA", "large");
    let err = PerimeterConfig::load().expect_err("non-numeric area must fail");
    assert!(err.to_string().contains("PIDS_MIN_AREA"));

    clear_env();
}

#[test]
fn env_override_is_validated() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PIDS_FUSION_ALPHA", "1.4");
    let err = PerimeterConfig::load().expect_err("alpha above 1 must fail");
    assert!(matches!(
        err.downcast_ref::<PerimeterError>(),
        Some(PerimeterError::InvalidConfig(_))
    ));

    clear_env();
}

#[test]
fn missing_config_file_names_the_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PIDS_CONFIG", "/nonexistent/pids.toml");
    let err = PerimeterConfig::load().expect_err("missing file must fail");
    assert!(err.to_string().contains("/nonexistent/pids.toml"));

    clear_env();
}
