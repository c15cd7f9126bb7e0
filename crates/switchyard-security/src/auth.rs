use switchyard_core::{SwitchyardError, SwitchyardResult};

/// Check an `Authorization` header value against the accepted tokens.
///
/// An empty token list disables the check. Otherwise the header must be
/// `Bearer <token>` with a token from the list.
pub fn verify_bearer(header: Option<&str>, tokens: &[String]) -> SwitchyardResult<()> {
    if tokens.is_empty() {
        return Ok(());
    }

    let token = header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| SwitchyardError::Unauthorized("Missing bearer token".into()))?;

    if tokens.iter().any(|t| t == token) {
        Ok(())
    } else {
        Err(SwitchyardError::Unauthorized("Invalid bearer token".into()))
    }
}
