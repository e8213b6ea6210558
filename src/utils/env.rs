/// Read an environment variable with the `OSSY_` prefix, falling back to the
/// bare name.
///
/// Hosting platforms and payment dashboards tend to hand out bare names
/// (`PORT`, `XENDIT_SECRET_KEY`), so both spellings are accepted and the
/// prefixed one wins.
///
/// # Examples
///
/// ```rust
/// use ossy_payments::utils::get_env_with_prefix;
///
/// // Checks OSSY_PORT first, then PORT
/// let port = get_env_with_prefix("PORT");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("OSSY_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Parse a prefixed environment variable, ignoring values that fail to parse.
pub fn parse_env_with_prefix<T: std::str::FromStr>(key: &str) -> Option<T> {
    get_env_with_prefix(key).and_then(|v| v.trim().parse().ok())
}
