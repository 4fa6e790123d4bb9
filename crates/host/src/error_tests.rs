// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use yare::parameterized;

#[parameterized(
    unauthorized = { ErrorCode::Unauthorized, "unauthorized", 401 },
    not_found = { ErrorCode::NotFound, "not_found", 404 },
    invalid_state = { ErrorCode::InvalidState, "invalid_state", 409 },
    resource_limit = { ErrorCode::ResourceLimit, "resource_limit", 429 },
    blocked = { ErrorCode::Blocked, "blocked", 423 },
    request_timeout = { ErrorCode::RequestTimeout, "request_timeout", 504 },
    bad_request = { ErrorCode::BadRequest, "bad_request", 400 },
    internal = { ErrorCode::Internal, "internal", 500 },
)]
fn wire_form_and_status(code: ErrorCode, wire: &str, status: u16) {
    assert_eq!(code.as_str(), wire);
    assert_eq!(code.http_status(), status);
}

#[test]
fn op_error_display() {
    let err = OpError::not_found("terminal term-1");
    assert_eq!(err.to_string(), "not_found: terminal term-1");
    assert_eq!(err.code, ErrorCode::NotFound);
}
