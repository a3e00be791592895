//! Unit tests for line classification and stream-message assembly.
//!
//! Exercises the parser's tolerance contract: plain-text chatter is
//! silently dropped, structured-looking garbage is a non-fatal error, and
//! the assembled message is identical whether or not garbage lines are
//! interleaved with valid events.

use agent_conduit::models::message::StopReason;
use agent_conduit::stream::events::EventPayload;
use agent_conduit::stream::parser::{classify_line, EventAssembler};
use agent_conduit::ConduitError;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// A minimal valid event sequence producing one text block reading "Hi".
fn hello_sequence() -> Vec<&'static str> {
    vec![
        r#"{"type":"message_start","message":{"id":"msg_1","role":"assistant"}}"#,
        r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        r#"{"type":"content_block_stop","index":0}"#,
        r#"{"type":"message_stop","usage":{"input_tokens":3,"output_tokens":1}}"#,
    ]
}

/// Run a line sequence through classification and assembly, returning the
/// assembler afterwards.
fn assemble(lines: &[&str]) -> EventAssembler {
    let mut assembler = EventAssembler::new();
    for line in lines {
        if let Ok(Some(payload)) = classify_line(line) {
            assembler.apply(&payload);
        }
    }
    assembler
}

// ── Line classification ──────────────────────────────────────────────────────

/// Lines that do not open with `{` or `[` are incidental CLI chatter and
/// classify to nothing, not to an error.
#[test]
fn plain_text_chatter_is_silently_dropped() {
    for line in ["not json at all", "warning: something", "", "   "] {
        let classified = classify_line(line).expect("chatter must not be an error");
        assert!(
            classified.is_none(),
            "line {line:?} must be silently dropped"
        );
    }
}

/// A line that opens like JSON but does not parse is a non-fatal parse
/// error, distinguishable from chatter.
#[test]
fn structured_looking_garbage_is_a_parse_error() {
    let err = classify_line("{\"type\": \"message_start\", broken")
        .expect_err("malformed structured line must error");
    assert!(matches!(err, ConduitError::Parse(_)), "got: {err}");
    assert!(err.is_recoverable(), "parse errors never abort the stream");
}

/// A structured line with an unknown `type` is skipped without error; the
/// source may emit event kinds this crate does not model.
#[test]
fn unknown_event_type_is_skipped() {
    let classified = classify_line(r#"{"type":"system","subtype":"init"}"#)
        .expect("unknown types are skipped, not errors");
    assert!(classified.is_none());
}

/// A structured line missing the `type` discriminator is a parse error.
#[test]
fn missing_discriminator_is_a_parse_error() {
    let err = classify_line(r#"{"message":"hello"}"#)
        .expect_err("a structured line without `type` must error");
    assert!(matches!(err, ConduitError::Parse(_)));
}

/// A known event type with a body that fails the typed decode is a parse
/// error whose message names the offending type.
#[test]
fn known_type_with_malformed_body_names_the_type() {
    let err = classify_line(r#"{"type":"content_block_delta","index":"not a number"}"#)
        .expect_err("a malformed body for a known type must error");
    assert!(matches!(err, ConduitError::Parse(_)), "got: {err}");
    assert!(
        err.to_string().contains("content_block_delta"),
        "the error must name the event type: {err}"
    );
}

// ── Assembly: the canonical sequence ─────────────────────────────────────────

/// `[message_start, content_block_start(0), content_block_delta(0,"Hi"),
/// content_block_stop(0), message_stop]` yields one finalized block with
/// text "Hi" and a complete message.
#[test]
fn canonical_sequence_yields_hi_message() {
    let mut assembler = assemble(&hello_sequence());

    assert!(assembler.is_complete(), "message_stop must seal the message");
    let message = assembler.take_message().expect("assembled message");
    assert_eq!(message.id, "msg_1");
    assert_eq!(message.content.len(), 1, "exactly one block");
    assert_eq!(message.content[0].text, "Hi");
    assert!(message.content[0].finalized);
    assert_eq!(message.usage.input_tokens, 3);
    assert_eq!(message.usage.output_tokens, 1);
}

/// Interleaving garbage lines between valid events yields exactly the same
/// final message as the clean sequence.
#[test]
fn garbage_interleaving_does_not_change_the_result() {
    let clean = assemble(&hello_sequence()).take_message();

    let mut dirty_lines = Vec::new();
    for line in hello_sequence() {
        dirty_lines.push("loading model weights...");
        dirty_lines.push(line);
        dirty_lines.push("{\"type\": broken json");
    }
    let dirty = assemble(&dirty_lines).take_message();

    assert_eq!(
        clean, dirty,
        "valid-event assembly must be independent of interleaved garbage"
    );
}

/// A plain-garbage line directly followed by `message_stop` still
/// finalizes the in-progress message.
#[test]
fn garbage_then_message_stop_still_finalizes() {
    let assembler = assemble(&[
        r#"{"type":"message_start","message":{"id":"m","role":"assistant"}}"#,
        "not json at all",
        r#"{"type":"message_stop"}"#,
    ]);
    assert!(assembler.is_complete());
}

// ── Assembly: tolerance rules ────────────────────────────────────────────────

/// Blocks with non-contiguous indices are appended in arrival order; the
/// index is advisory, not an array address.
#[test]
fn non_contiguous_indices_append_in_arrival_order() {
    let mut assembler = assemble(&[
        r#"{"type":"message_start","message":{"id":"m","role":"assistant"}}"#,
        r#"{"type":"content_block_start","index":5,"content_block":{"type":"text","text":""}}"#,
        r#"{"type":"content_block_start","index":2,"content_block":{"type":"text","text":""}}"#,
        r#"{"type":"content_block_delta","index":2,"delta":{"type":"text_delta","text":"b"}}"#,
        r#"{"type":"content_block_delta","index":5,"delta":{"type":"text_delta","text":"a"}}"#,
        r#"{"type":"message_stop"}"#,
    ]);

    let message = assembler.take_message().expect("assembled message");
    assert_eq!(message.content.len(), 2);
    assert_eq!(
        (message.content[0].index, message.content[0].text.as_str()),
        (5, "a"),
        "first-arrived block keeps its advisory index and its own deltas"
    );
    assert_eq!(
        (message.content[1].index, message.content[1].text.as_str()),
        (2, "b")
    );
}

/// Deltas and stops addressing an index that never started are ignored.
#[test]
fn dangling_delta_and_stop_are_ignored() {
    let mut assembler = assemble(&[
        r#"{"type":"message_start","message":{"id":"m","role":"assistant"}}"#,
        r#"{"type":"content_block_delta","index":9,"delta":{"type":"text_delta","text":"lost"}}"#,
        r#"{"type":"content_block_stop","index":9}"#,
        r#"{"type":"message_stop"}"#,
    ]);

    let message = assembler.take_message().expect("assembled message");
    assert!(
        message.content.is_empty(),
        "no block may be conjured for a dangling index"
    );
}

/// Usage counters are last-write-wins from `message_delta` /
/// `message_stop`, never summed.
#[test]
fn usage_is_last_write_wins() {
    let mut assembler = assemble(&[
        r#"{"type":"message_start","message":{"id":"m","role":"assistant","usage":{"input_tokens":10,"output_tokens":0}}}"#,
        r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"input_tokens":10,"output_tokens":7}}"#,
        r#"{"type":"message_stop","usage":{"input_tokens":10,"output_tokens":9}}"#,
    ]);

    let message = assembler.take_message().expect("assembled message");
    assert_eq!(
        message.usage.output_tokens, 9,
        "final counters overwrite, not accumulate"
    );
    assert_eq!(message.stop_reason, Some(StopReason::EndTurn));
}

/// A second `message_start` replaces the in-progress accumulator.
#[test]
fn message_start_replaces_prior_accumulator() {
    let mut assembler = assemble(&[
        r#"{"type":"message_start","message":{"id":"first","role":"assistant"}}"#,
        r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":"old"}}"#,
        r#"{"type":"message_start","message":{"id":"second","role":"assistant"}}"#,
        r#"{"type":"message_stop"}"#,
    ]);

    let message = assembler.take_message().expect("assembled message");
    assert_eq!(message.id, "second");
    assert!(message.content.is_empty(), "prior blocks must be discarded");
}

/// An `error` event decodes as a recognized payload; it surfaces on the
/// caller's error path without touching the accumulator.
#[test]
fn error_event_decodes_and_leaves_accumulator_alone() {
    let payload = classify_line(r#"{"type":"error","error":{"type":"overloaded","message":"busy"}}"#)
        .expect("error events are valid")
        .expect("error events are recognized");
    assert!(matches!(payload, EventPayload::Error { .. }));

    let mut assembler = EventAssembler::new();
    let terminal = assembler.apply(&payload);
    assert!(!terminal, "error events are not terminal");
    assert!(assembler.message().is_none());
}
