//! Maps one send result onto the attempt record.

use chrono::{DateTime, Utc};

use grantflow_core::{snapshot, AttemptStatus, DeliveryAttempt, ErrorKind};

use crate::backoff::RetryPolicy;
use crate::traits::{NotifyError, WebhookResponse};

/// Fill status, error and retry fields of `attempt` from `result`.
///
/// | result                     | attempt < max | attempt == max |
/// |----------------------------|---------------|----------------|
/// | 2xx                        | success       | success        |
/// | 5xx, transport, timeout    | retrying      | failed (max_retries) |
/// | other status               | failed (rejected) | failed (rejected) |
/// | template / config error    | failed (payload)  | failed (payload)  |
pub(crate) fn settle(
    attempt: &mut DeliveryAttempt,
    result: Result<WebhookResponse, NotifyError>,
    policy: &RetryPolicy,
    sent_at: DateTime<Utc>,
) {
    attempt.sent_at = Some(sent_at);

    let transient = match result {
        Ok(response) => {
            attempt.http_status = Some(response.status);
            attempt.response_body = Some(snapshot(&response.body)).filter(|b| !b.is_empty());
            if response.is_success() {
                attempt.status = AttemptStatus::Success;
                return;
            }
            if !response.is_server_error() {
                attempt.status = AttemptStatus::Failed;
                attempt.error_kind = Some(ErrorKind::Rejected);
                attempt.error_message = Some(format!("endpoint rejected payload with HTTP {}", response.status));
                return;
            }
            (ErrorKind::ServerError, format!("endpoint returned HTTP {}", response.status))
        }
        Err(NotifyError::Timeout(message)) => (ErrorKind::Timeout, message),
        Err(e @ NotifyError::Http(_)) => (ErrorKind::Transport, e.to_string()),
        Err(e) => {
            attempt.status = AttemptStatus::Failed;
            attempt.error_kind = Some(ErrorKind::Payload);
            attempt.error_message = Some(e.to_string());
            return;
        }
    };

    let (kind, message) = transient;
    if policy.allows_retry_after(attempt.attempt_number) {
        attempt.status = AttemptStatus::Retrying;
        attempt.error_kind = Some(kind);
        attempt.next_retry_at = Some(policy.next_retry_at(sent_at, attempt.attempt_number));
    } else {
        attempt.status = AttemptStatus::Failed;
        attempt.error_kind = Some(ErrorKind::MaxRetries);
    }
    attempt.error_message = Some(message);
}
