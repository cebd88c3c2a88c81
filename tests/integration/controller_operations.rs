#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use traza::{ComponentId, ComponentKind, MonitoringController, MonitoringVersion};

#[test]
fn operation_invalidation_scenario() {
    let controller = MonitoringController::new();
    controller.enable();
    let reporter = ComponentId::new("R");

    let scope = controller.begin_operation();
    assert!(scope.is_valid());
    controller.enable_reporter(reporter.clone());

    assert!(!scope.is_valid(), "version change invalidates the scope");
    assert!(
        !scope.should_track(Some(&reporter), None),
        "pinned version predates the reporter activation"
    );
    assert!(
        controller.should_track(controller.current_version(), Some(&reporter), None),
        "the current version tracks"
    );
}

#[test]
fn operation_scope_state_machine_is_one_way() {
    let controller = MonitoringController::new();
    controller.enable();
    let scope = controller.begin_operation();
    assert!(scope.is_valid());
    controller.enable_filter("F");
    assert!(!scope.is_valid());
    controller.disable_filter("F");
    assert!(!scope.is_valid(), "validity never comes back inside a scope");
    scope.close();
    assert!(controller.begin_operation().is_valid());
}

#[test]
fn global_disable_suppresses_component_flags() {
    let controller = MonitoringController::new();
    let csv = ComponentId::new("csv");
    controller.enable();
    controller.enable_reporter(csv.clone());
    assert!(controller.should_track(controller.current_version(), Some(&csv), None));

    controller.disable();
    assert!(!controller.should_track(controller.current_version(), Some(&csv), None));
    assert!(
        controller.is_reporter_enabled(&csv),
        "component flag survives the disable"
    );

    controller.enable();
    assert!(
        controller.should_track(controller.current_version(), Some(&csv), None),
        "enable restores the component flag's last value"
    );
}

#[test]
fn state_changes_broadcast_in_order() {
    let controller = MonitoringController::new();
    let changes: Arc<Mutex<Vec<(ComponentKind, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    controller.add_state_changed_callback(move |change| {
        sink.lock().push((change.kind, change.enabled));
    });
    let versions: Arc<Mutex<Vec<(MonitoringVersion, MonitoringVersion)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&versions);
    controller.add_version_changed_callback(move |old, new| {
        sink.lock().push((old, new));
    });

    controller.enable();
    controller.enable_reporter("csv");
    controller.disable();

    let changes = changes.lock();
    assert_eq!(
        *changes,
        vec![
            (ComponentKind::Global, true),
            (ComponentKind::Reporter, true),
            (ComponentKind::Global, false),
        ]
    );
    let versions = versions.lock();
    assert_eq!(versions.len(), 3);
    for (old, new) in versions.iter() {
        assert!(old < new);
    }
    for window in versions.windows(2) {
        assert!(window[0].1 <= window[1].0, "broadcasts arrive in version order");
    }
}

#[test]
fn tests_can_run_many_independent_controllers() {
    let controllers: Vec<_> = (0..8).map(|_| MonitoringController::new()).collect();
    controllers[3].enable();
    for (index, controller) in controllers.iter().enumerate() {
        assert_eq!(controller.is_enabled(), index == 3);
    }
}

proptest! {
    /// Once global disable occurs, `should_track` stays false for every
    /// version at or before the disable, no matter what happens next.
    #[test]
    fn should_track_is_monotone_after_disable(ops in proptest::collection::vec(0u8..4, 0..40)) {
        let controller = MonitoringController::new();
        controller.enable();
        let mut pre_disable_versions = vec![controller.current_version()];

        for op in &ops {
            match *op {
                0 => controller.enable(),
                1 => controller.enable_reporter("r"),
                2 => controller.disable_reporter("r"),
                _ => controller.enable_filter("f"),
            }
            pre_disable_versions.push(controller.current_version());
        }

        controller.disable();
        let disable_version = controller.current_version();
        controller.enable();

        for version in pre_disable_versions {
            prop_assert!(!controller.should_track(version, None, None));
        }
        prop_assert!(!controller.should_track(disable_version, None, None));
        prop_assert!(controller.should_track(controller.current_version(), None, None));
    }
}
