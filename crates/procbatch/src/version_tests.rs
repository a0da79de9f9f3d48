//! Tests for ServerVersion

use rstest::rstest;

use crate::version::ServerVersion;

#[rstest]
#[case("15.0.2000.5", ServerVersion::new(15, 0, 2000))]
#[case("9.00.5000.00", ServerVersion::new(9, 0, 5000))]
#[case("16.0", ServerVersion::new(16, 0, 0))]
#[case(" 10 ", ServerVersion::new(10, 0, 0))]
fn test_parse(#[case] text: &str, #[case] expected: ServerVersion) {
    assert_eq!(text.parse::<ServerVersion>().unwrap(), expected);
}

#[rstest]
#[case("")]
#[case("abc")]
#[case("15.x")]
#[case(".1")]
fn test_parse_rejects_garbage(#[case] text: &str) {
    assert!(text.parse::<ServerVersion>().is_err());
}

#[test]
fn test_inline_declare_starts_after_version_9() {
    assert!(!ServerVersion::new(8, 0, 0).supports_inline_declare());
    assert!(!ServerVersion::new(9, 0, 5000).supports_inline_declare());
    assert!(ServerVersion::new(10, 0, 0).supports_inline_declare());
    assert!(ServerVersion::default().supports_inline_declare());
}

#[test]
fn test_ordering_and_display() {
    assert!(ServerVersion::new(10, 50, 0) > ServerVersion::new(10, 0, 9999));
    assert_eq!(ServerVersion::new(15, 0, 2000).to_string(), "15.0.2000");
}
