use unai_detect::{
    collector::{RawOutcome, Termination},
    resolver::{
        DecodedResult, NOTE_NONZERO_EXIT, NOTE_NOT_INSTALLED, NOTE_NO_OUTPUT, NOTE_TIMED_OUT,
        NOTE_UNDECODABLE, OutcomeResolver,
    },
};

fn exited(stdout: &str, code: i32) -> RawOutcome {
    RawOutcome {
        primary: stdout.as_bytes().to_vec(),
        diagnostic: String::new(),
        termination: Termination::Exited(code),
    }
}

fn resolver() -> OutcomeResolver {
    OutcomeResolver::new(500, false)
}

#[test]
fn missing_worker_wins_over_everything() {
    let res = resolver().resolve(&RawOutcome::absent(Termination::Unavailable));
    assert_eq!(res.result, DecodedResult::NoOutput);
    assert_eq!(res.note, Some(NOTE_NOT_INSTALLED));
}

#[test]
fn timeout_resolves_as_no_output() {
    let res = resolver().resolve(&RawOutcome::absent(Termination::TimedOut));
    assert_eq!(res.result, DecodedResult::NoOutput);
    assert_eq!(res.note, Some(NOTE_TIMED_OUT));
}

#[test]
fn whitespace_only_output_is_no_output() {
    let res = resolver().resolve(&exited("  \n\t \n", 0));
    assert_eq!(res.result, DecodedResult::NoOutput);
    assert_eq!(res.note, Some(NOTE_NO_OUTPUT));
}

#[test]
fn explicit_error_marker_is_pipeline_error() {
    let res = resolver().resolve(&exited(r#"{"pipeline_status":"error","error":"x"}"#, 1));
    assert_eq!(
        res.result,
        DecodedResult::PipelineError {
            message: "x".into()
        }
    );
}

#[test]
fn error_marker_without_message_still_fails() {
    let res = resolver().resolve(&exited(r#"{"pipeline_status":"error"}"#, 0));
    assert!(matches!(res.result, DecodedResult::PipelineError { .. }));
}

#[test]
fn truncated_json_is_decode_failure_with_bounded_sample() {
    let garbage = format!("{{\"pipeline_status\": \"ok\", \"detection\": {}", "9".repeat(2000));
    let res = resolver().resolve(&exited(&garbage, 0));
    match res.result {
        DecodedResult::DecodeFailure { raw_sample } => {
            assert_eq!(raw_sample.chars().count(), 500);
            assert!(garbage.starts_with(&raw_sample));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(res.note, Some(NOTE_UNDECODABLE));
}

#[test]
fn ok_status_without_detection_is_decode_failure() {
    let res = resolver().resolve(&exited(r#"{"pipeline_status":"ok"}"#, 0));
    assert!(matches!(res.result, DecodedResult::DecodeFailure { .. }));
}

#[test]
fn success_payload_is_decoded() {
    let res = resolver().resolve(&exited(
        r#"{"pipeline_status":"ok","detection":{"is_deepfake":true,"confidence":0.93}}"#,
        0,
    ));
    assert_eq!(
        res.result,
        DecodedResult::Success {
            is_authentic: false,
            confidence: 0.93,
            regenerated_artifact_path: None,
        }
    );
    assert_eq!(res.note, None);
}

#[test]
fn worker_success_vocabulary_and_regeneration() {
    let res = resolver().resolve(&exited(
        r#"{"pipeline_status":"success",
            "detection":{"is_deepfake":true,"confidence":0.8,"status":"success"},
            "regeneration":{"success":true,"output_path":"/srv/regenerated/regen_1.png","status":"success"}}"#,
        0,
    ));
    match res.result {
        DecodedResult::Success {
            regenerated_artifact_path,
            ..
        } => assert_eq!(
            regenerated_artifact_path.as_deref(),
            Some("/srv/regenerated/regen_1.png")
        ),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn failed_regeneration_yields_no_path() {
    let res = resolver().resolve(&exited(
        r#"{"pipeline_status":"success","detection":{"is_deepfake":true,"confidence":0.8},
            "regeneration":{"success":false,"output_path":null,"error":"no model"}}"#,
        0,
    ));
    assert!(matches!(
        res.result,
        DecodedResult::Success {
            regenerated_artifact_path: None,
            ..
        }
    ));
}

#[test]
fn confidence_is_clamped() {
    let high = resolver().resolve(&exited(
        r#"{"pipeline_status":"ok","detection":{"is_deepfake":false,"confidence":1.7}}"#,
        0,
    ));
    let low = resolver().resolve(&exited(
        r#"{"pipeline_status":"ok","detection":{"is_deepfake":false,"confidence":-3}}"#,
        0,
    ));
    assert!(matches!(high.result, DecodedResult::Success { confidence, .. } if confidence == 1.0));
    assert!(matches!(low.result, DecodedResult::Success { confidence, .. } if confidence == 0.0));
}

#[test]
fn payload_is_trusted_over_exit_code_by_default() {
    let res = resolver().resolve(&exited(
        r#"{"pipeline_status":"ok","detection":{"is_deepfake":false,"confidence":0.1}}"#,
        3,
    ));
    assert!(res.result.is_success());
}

#[test]
fn strict_mode_downgrades_nonzero_exit() {
    let strict = OutcomeResolver::new(500, true);
    let res = strict.resolve(&exited(
        r#"{"pipeline_status":"ok","detection":{"is_deepfake":false,"confidence":0.1}}"#,
        3,
    ));
    assert!(matches!(res.result, DecodedResult::DecodeFailure { .. }));
    assert_eq!(res.note, Some(NOTE_NONZERO_EXIT));
    assert!(res.is_exit_rejection());
}

#[test]
fn garbled_output_is_not_an_exit_rejection() {
    let strict = OutcomeResolver::new(500, true);
    let res = strict.resolve(&exited("{\"pipeline_status\":", 3));
    assert_eq!(res.note, Some(NOTE_UNDECODABLE));
    assert!(!res.is_exit_rejection());
}
