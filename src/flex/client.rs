//! Flex Web Service transport adapter (`spec.md` §4.2).
//!
//! Pooled `reqwest::Client` lifecycle grounded in the teacher's
//! `scrapers::dome_rest::DomeRestClient::new` (explicit timeout, idle-pool
//! sizing, keepalive — built once, reused for every request). The
//! `SendRequest` / `GetStatement` poll dance and retry schedule are this
//! crate's own, per `spec.md` §4.2; the backoff math is `BackoffState`
//! from `super::retry`, grounded in `scrapers::binance_session`.

use super::codes::{self, Code};
use super::retry::BackoffState;
use super::xml::{self, FlexStatementResponse};
use crate::config::RetryTuning;
use crate::error::{FlexErrorCode, FlexTransportError};
use reqwest::Client;
use std::time::Duration;

const SEND_REQUEST_URL: &str =
    "https://ndcdyn.interactivebrokers.com/AccountManagement/FlexWebService/SendRequest";
const GET_STATEMENT_URL: &str =
    "https://ndcdyn.interactivebrokers.com/AccountManagement/FlexWebService/GetStatement";
const FLEX_API_VERSION: &str = "3";

pub struct FlexClient {
    client: Client,
}

/// One `GetStatement` poll attempt that came back not-ready, carrying
/// everything `spec.md` §4.1's `poll` stage diagnostics need per attempt.
#[derive(Debug, Clone)]
pub struct PollAttempt {
    pub attempt: u32,
    pub error_code: u32,
    pub error_message: String,
    pub retry_after_seconds: f64,
}

/// Result of a completed `SendRequest → GetStatement` dance: the raw
/// success-envelope XML bytes, the upstream reference code the request
/// phase produced, and every not-ready poll attempt observed along the
/// way (`spec.md` §4.1 "request"/"poll" stage diagnostics).
pub struct FetchOutcome {
    pub body: String,
    pub reference_code: String,
    pub poll_attempts: Vec<PollAttempt>,
}

impl FlexClient {
    pub fn new() -> Result<Self, FlexTransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(FlexTransportError::Connection)?;
        Ok(Self { client })
    }

    /// Run the full `SendRequest → GetStatement` dance to completion,
    /// returning the raw success-envelope XML bytes along with the
    /// reference code and per-attempt poll diagnostics.
    pub async fn fetch_statement(
        &self,
        token: &str,
        query_id: &str,
        tuning: &RetryTuning,
    ) -> Result<FetchOutcome, FlexTransportError> {
        let reference_code = self.send_request(token, query_id).await?;

        tokio::time::sleep(tuning.initial_wait).await;

        let mut backoff = BackoffState::new(tuning);
        let mut poll_attempts = Vec::new();
        loop {
            match self.poll_once(token, &reference_code).await? {
                PollOutcome::Ready(body) => {
                    return Ok(FetchOutcome {
                        body,
                        reference_code,
                        poll_attempts,
                    })
                }
                PollOutcome::Retry { code, message } => {
                    if backoff.exhausted() {
                        return Err(FlexTransportError::PollTimeout {
                            attempts: backoff.attempt(),
                        });
                    }
                    let attempt = backoff.attempt();
                    let delay = backoff.next_delay(code);
                    poll_attempts.push(PollAttempt {
                        attempt,
                        error_code: code.0,
                        error_message: message,
                        retry_after_seconds: delay.as_secs_f64(),
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn send_request(&self, token: &str, query_id: &str) -> Result<String, FlexTransportError> {
        let resp = self
            .client
            .get(SEND_REQUEST_URL)
            .query(&[("t", token), ("q", query_id), ("v", FLEX_API_VERSION)])
            .send()
            .await
            .map_err(classify_send_error)?;

        let body = resp.text().await.map_err(classify_send_error)?;
        let envelope = xml::parse_envelope(&body)?;
        raise_on_error_status(&envelope, Phase::Request)?;

        envelope.reference_code.ok_or_else(|| FlexTransportError::RequestPhase {
            code: FlexErrorCode(0),
            message: "SendRequest succeeded but no ReferenceCode was returned".to_string(),
        })
    }

    async fn poll_once(
        &self,
        token: &str,
        reference_code: &str,
    ) -> Result<PollOutcome, FlexTransportError> {
        let resp = self
            .client
            .get(GET_STATEMENT_URL)
            .query(&[("q", reference_code), ("t", token), ("v", FLEX_API_VERSION)])
            .send()
            .await
            .map_err(classify_send_error)?;

        let body = resp.text().await.map_err(classify_send_error)?;

        if xml::root_tag_name(&body).as_deref() == Some("FlexQueryResponse") {
            return Ok(PollOutcome::Ready(body));
        }

        let envelope = xml::parse_envelope(&body)?;
        let code = Code(envelope.error_code.unwrap_or(0));

        if codes::is_token_error(code) {
            raise_on_error_status(&envelope, Phase::Statement)?;
        }
        if codes::is_retryable_in_poll(code) {
            return Ok(PollOutcome::Retry {
                code,
                message: envelope.error_message.clone().unwrap_or_default(),
            });
        }

        raise_on_error_status(&envelope, Phase::Statement)?;
        // `raise_on_error_status` returns Ok(()) only when status was Success,
        // which can't happen with a non-FlexQueryResponse body here.
        Err(FlexTransportError::StatementPhase {
            code: FlexErrorCode(code.0),
            message: envelope.error_message.unwrap_or_default(),
        })
    }
}

enum PollOutcome {
    Ready(String),
    Retry { code: Code, message: String },
}

enum Phase {
    Request,
    Statement,
}

fn raise_on_error_status(
    envelope: &FlexStatementResponse,
    phase: Phase,
) -> Result<(), FlexTransportError> {
    if envelope.status.eq_ignore_ascii_case("Success") {
        return Ok(());
    }
    let code = Code(envelope.error_code.unwrap_or(0));
    let message = envelope.error_message.clone().unwrap_or_default();

    if codes::is_token_error(code) {
        return Err(if code == codes::TOKEN_EXPIRED {
            FlexTransportError::TokenExpired(FlexErrorCode(code.0))
        } else {
            FlexTransportError::TokenInvalid(FlexErrorCode(code.0))
        });
    }

    match phase {
        Phase::Request => Err(FlexTransportError::RequestPhase {
            code: FlexErrorCode(code.0),
            message,
        }),
        Phase::Statement => Err(FlexTransportError::StatementPhase {
            code: FlexErrorCode(code.0),
            message,
        }),
    }
}

fn classify_send_error(err: reqwest::Error) -> FlexTransportError {
    if err.is_timeout() {
        FlexTransportError::Timeout(err)
    } else {
        FlexTransportError::Connection(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_on_error_status_classifies_token_codes() {
        let envelope = FlexStatementResponse {
            status: "Fail".to_string(),
            reference_code: None,
            url: None,
            error_code: Some(1012),
            error_message: Some("token expired".to_string()),
        };
        let err = raise_on_error_status(&envelope, Phase::Request).unwrap_err();
        assert!(matches!(err, FlexTransportError::TokenExpired(_)));
    }

    #[test]
    fn raise_on_error_status_passes_through_success() {
        let envelope = FlexStatementResponse {
            status: "Success".to_string(),
            reference_code: Some("abc".to_string()),
            url: None,
            error_code: None,
            error_message: None,
        };
        assert!(raise_on_error_status(&envelope, Phase::Request).is_ok());
    }
}
