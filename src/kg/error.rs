use thiserror::Error;

/// Failure kinds of the KG gateway.
///
/// Rate limiting and transient 5xx/transport failures are retried inside the
/// gateway and only surface as `Unavailable` once the retry budget is spent.
/// Probe timeouts never surface here at all; they map to the infeasible probe
/// outcome instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("KG endpoint unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },

    #[error("KG rejected the request (HTTP {status}): {message}")]
    BadRequest { status: u16, message: String },

    #[error("malformed KG response: {0}")]
    BadResponse(String),
}
