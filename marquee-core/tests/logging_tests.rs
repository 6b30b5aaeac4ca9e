// Global subscriber installation; kept in its own test binary

use marquee_core::logging;

#[test]
fn test_init_once_then_error() {
    assert!(logging::init("marquee_core=debug").is_ok());
    tracing::info!("Subscriber installed");

    // A second global subscriber is refused without panicking
    assert!(logging::init("info").is_err());
    assert!(logging::init_from_env().is_err());
}
