// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    plain_string = { r#""Invalid username or password""#, "Invalid username or password" },
    string_list = { r#"["first", "second"]"#, "first; second" },
    message_field = { r#"{"message": "Forbidden resource"}"#, "Forbidden resource" },
    detail_field = { r#"{"detail": "Token has been revoked"}"#, "Token has been revoked" },
    detail_list = { r#"{"detail": ["too short", "needs a digit"]}"#, "too short; needs a digit" },
    errors_list = { r#"{"errors": ["name taken"]}"#, "name taken" },
    errors_map = { r#"{"errors": {"password": ["too short"], "username": "taken"}}"#,
                   "password: too short; username: taken" },
    message_wins = { r#"{"detail": "second", "message": "first"}"#, "first" },
)]
fn normalizes_error_bodies(body: &str, expected: &str) {
    assert_eq!(error_message(400, body.as_bytes()), expected);
}

#[yare::parameterized(
    empty = { "" },
    html = { "<html>Bad Gateway</html>" },
    number = { "42" },
    empty_object = { "{}" },
    blank_string = { r#""   ""# },
    empty_list = { "[]" },
    unrelated_keys = { r#"{"code": 17}"# },
)]
fn falls_back_to_status(body: &str) {
    assert_eq!(error_message(502, body.as_bytes()), "Request failed with status 502");
}

#[test]
fn api_error_display_is_message() {
    let err = ApiError::from_response(ErrorCode::RequestFailed, 404, br#"{"detail":"not found"}"#);
    assert_eq!(err.to_string(), "not found");
    assert_eq!(err.status, Some(404));
    assert_eq!(err.code.as_str(), "REQUEST_FAILED");
}

#[yare::parameterized(
    expired = { ErrorCode::SessionExpired, true },
    rejected = { ErrorCode::AuthRejected, true },
    local = { ErrorCode::NotAuthenticated, true },
    malformed = { ErrorCode::MalformedCredential, true },
    network = { ErrorCode::NetworkFailure, false },
    validation = { ErrorCode::ValidationFailure, false },
    request = { ErrorCode::RequestFailed, false },
)]
fn requires_login(code: ErrorCode, expected: bool) {
    assert_eq!(code.requires_login(), expected);
}

#[test]
fn refresh_error_is_descriptive() {
    let err = RefreshError::Rejected { status: 401, message: "Invalid refresh token".into() };
    assert_eq!(err.to_string(), "refresh rejected (401): Invalid refresh token");
    assert_eq!(RefreshError::NoRefreshToken.to_string(), "no refresh token stored");
}

#[test]
fn malformed_credential_converts() {
    let err = ApiError::from(Malformed::Segments);
    assert_eq!(err.code, ErrorCode::MalformedCredential);
    assert_eq!(err.status, None);
    assert_eq!(err.message, "malformed credential: expected three dot-separated segments");
}
