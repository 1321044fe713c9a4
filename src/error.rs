/// Failures that end a webhook invocation.
///
/// None of these are recovered locally: the only retrying happens inside
/// the sender, before a `Delivery` or `Transport` error is produced.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Caller token rejected, or a team token could not be refreshed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Webhook body is not a valid event envelope.
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    /// SendMammy answered with a status other than 200 or 409.
    #[error("error in pushing message: ({status}) {body}")]
    Delivery {
        /// Final HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// SendMammy could not be reached.
    #[error("send request failed after {attempts} attempt(s): {source}")]
    Transport {
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },

    /// A language processor invocation failed.
    #[error("message processing failed: {0:#}")]
    Processor(anyhow::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Read an error response body for diagnostics. A body that cannot be read
/// is logged and reported as empty so the status still reaches the caller.
pub(crate) async fn response_text(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!("Failed to read {} response body: {}", status, e);
            String::new()
        }
    }
}
