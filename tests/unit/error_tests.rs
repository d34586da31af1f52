//! Unit tests for `AppError` display format and conversions.

use whisperer_diagnostics::AppError;

#[test]
fn display_carries_variant_prefix() {
    let cases = [
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Io("disk".into()), "io: disk"),
        (AppError::Signal("EINVAL".into()), "signal: EINVAL"),
        (AppError::NotFound("marker".into()), "not found: marker"),
        (AppError::Runtime("no reactor".into()), "runtime: no reactor"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn messages_have_no_trailing_period() {
    let err = AppError::Io("write failed".into());
    let s = err.to_string();
    assert!(!s.ends_with('.'), "error message must not end with a period: {s}");
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only volume");
    let err = AppError::from(io);
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("read-only volume")));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let toml_err = toml::from_str::<toml::Value>("= nope").expect_err("invalid toml");
    let err = AppError::from(toml_err);
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Runtime("test".into()));
}
