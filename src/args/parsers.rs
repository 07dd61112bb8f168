use crate::error::ValidationError;

/// Accept `host:port`, trimming whitespace and any `http://` prefix so the
/// same address works for binding and for building request URLs.
pub(crate) fn parse_address(s: &str) -> Result<String, ValidationError> {
    let trimmed = s.trim();
    let bare = trimmed
        .strip_prefix("http://")
        .unwrap_or(trimmed)
        .trim_end_matches('/');
    let valid = match bare.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    };
    if !valid {
        return Err(ValidationError::InvalidAddress {
            value: s.to_owned(),
        });
    }
    Ok(bare.to_owned())
}
