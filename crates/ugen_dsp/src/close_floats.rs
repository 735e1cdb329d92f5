//! Simple threshold-based floating point asserts.
//!
//! We could grab various crates for this but we generally want thresholds bigger than epsilon, and this is both small
//! and simple.

#[track_caller]
pub fn close_floats32(a: f32, b: f32, threshold: f32) {
    let diff = (a - b).abs();
    assert!(
        diff < threshold,
        "{} vs {}, difference {} is greater than threshold {}",
        a,
        b,
        diff,
        threshold
    );
}

/// Compare two slices elementwise, reporting the first index which is too different.
#[track_caller]
pub fn close_slices32(got: &[f32], expected: &[f32], threshold: f32) {
    assert_eq!(
        got.len(),
        expected.len(),
        "Slice lengths differ: got={}, expected={}",
        got.len(),
        expected.len()
    );

    for (i, (g, e)) in got.iter().copied().zip(expected.iter().copied()).enumerate() {
        let diff = (g - e).abs();
        assert!(
            diff < threshold,
            "Index {i} is too different: got={g}, expected={e}, difference {diff} is greater than threshold {threshold}"
        );
    }
}
