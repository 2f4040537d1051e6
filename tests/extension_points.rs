//! Downstream crates can plug in their own sources, detectors and publishers.

#[test]
fn extension_points_compile_outside_the_crate() {
    let t = trybuild::TestCases::new();
    t.pass("tests/compile_pass/*.rs");
}
