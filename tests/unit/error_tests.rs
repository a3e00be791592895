//! Unit tests for the error taxonomy and its classification helpers.

use agent_conduit::ConduitError;

/// Transport-fatal variants classify as fatal; others do not.
#[test]
fn transport_fatal_classification() {
    let fatal = [
        ConduitError::NotFound("claude".into()),
        ConduitError::Spawn("fork failed".into()),
        ConduitError::ClosedPipe("stdin".into()),
        ConduitError::Transport("early exit".into()),
        ConduitError::Io("broken pipe".into()),
    ];
    for err in fatal {
        assert!(err.is_transport_fatal(), "{err} must be transport-fatal");
        assert!(!err.is_cancelled());
    }

    let benign = [
        ConduitError::Validation("bad id".into(), None),
        ConduitError::Parse("bad line".into()),
        ConduitError::Cancelled("stopped".into()),
    ];
    for err in benign {
        assert!(!err.is_transport_fatal(), "{err} must not be transport-fatal");
    }
}

/// Cancellation and timeout both classify as "I stopped it", so callers
/// can branch on cancelled-vs-broke.
#[test]
fn cancellation_classification() {
    assert!(ConduitError::Cancelled("user".into()).is_cancelled());
    assert!(ConduitError::Timeout("deadline".into()).is_cancelled());
    assert!(!ConduitError::Transport("broke".into()).is_cancelled());
}

/// Validation and parse errors are recoverable by correcting input.
#[test]
fn recoverability_classification() {
    assert!(ConduitError::Validation("oops".into(), None).is_recoverable());
    assert!(ConduitError::Parse("oops".into()).is_recoverable());
    assert!(!ConduitError::Spawn("oops".into()).is_recoverable());
}

/// Display output carries both the category prefix and, for validation
/// errors, the suggested alternative.
#[test]
fn display_includes_category_and_suggestion() {
    let plain = ConduitError::Transport("pipe broke".into());
    assert_eq!(plain.to_string(), "transport: pipe broke");

    let suggested =
        ConduitError::Validation("bad id".into(), Some("1234".into()));
    let rendered = suggested.to_string();
    assert!(rendered.contains("bad id"));
    assert!(
        rendered.contains("1234"),
        "suggestion must appear in the rendering: {rendered}"
    );
}

/// `std::io::Error` converts into the crate's Io variant.
#[test]
fn io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
    let err: ConduitError = io.into();
    assert!(matches!(err, ConduitError::Io(_)));
    assert!(err.is_transport_fatal());
}
