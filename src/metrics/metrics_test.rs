use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("cfgsync".to_string()), None).unwrap();
    register_custom_metrics(&registry);
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    CAS_MISMATCH_TOTAL.with_label_values(&["set", "local"]).inc();
    let metrics = &registry.gather();
    assert!(!metrics.is_empty());

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        metric_names.contains(&"cfgsync_cfg_cas_mismatch_total"),
        "Missing cfgsync_cfg_cas_mismatch_total"
    );
}

#[test]
fn test_counter_increment() {
    let before = CAS_MISMATCH_TOTAL.with_label_values(&["test_op", "test_source"]).get();

    CAS_MISMATCH_TOTAL.with_label_values(&["test_op", "test_source"]).inc();
    CAS_MISMATCH_TOTAL.with_label_values(&["test_op", "test_source"]).inc();

    let value = CAS_MISMATCH_TOTAL.with_label_values(&["test_op", "test_source"]).get();
    assert_eq!(value, before + 2, "Counter should increment correctly");
}

#[test]
fn test_encode_metrics_contains_registered_counters() {
    WATCH_RESTART_TOTAL.inc();

    let body = encode_metrics();

    assert!(body.contains("cfg_watch_restart_total"));
}
