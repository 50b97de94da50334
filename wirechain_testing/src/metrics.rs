//! Capturing `wirechain` metrics with a [`DebuggingRecorder`].

use metrics::{SharedString, Unit};
use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder},
};

/// Snapshot entries as returned by [`metrics_util::debugging::Snapshot::into_vec`].
pub type Recorded = Vec<(CompositeKey, Option<Unit>, Option<SharedString>, DebugValue)>;

/// Run `f` with a thread-local debugging recorder and return what it recorded.
pub fn recorded<R>(f: impl FnOnce() -> R) -> (R, Recorded) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let out = metrics::with_local_recorder(&recorder, f);
    (out, snapshotter.snapshot().into_vec())
}

fn matches(key: &CompositeKey, name: &str, label: Option<(&str, &str)>) -> bool {
    key.key().name() == name
        && label.is_none_or(|(k, v)| key.key().labels().any(|l| l.key() == k && l.value() == v))
}

/// Value of counter `name`, optionally filtered by one label.
#[must_use]
pub fn counter_value(recorded: &Recorded, name: &str, label: Option<(&str, &str)>) -> Option<u64> {
    recorded.iter().find_map(|(key, _, _, value)| match value {
        DebugValue::Counter(c) if matches(key, name, label) => Some(*c),
        _ => None,
    })
}

/// Value of gauge `name`, optionally filtered by one label.
#[must_use]
pub fn gauge_value(recorded: &Recorded, name: &str, label: Option<(&str, &str)>) -> Option<f64> {
    recorded.iter().find_map(|(key, _, _, value)| match value {
        DebugValue::Gauge(g) if matches(key, name, label) => Some(g.into_inner()),
        _ => None,
    })
}
