// ABOUTME: Utility functions for identifier validation, quoting and retries
// ABOUTME: Shared by configuration validation and both database drivers

use anyhow::{bail, Result};
use std::time::Duration;

/// Maximum identifier length accepted by SQL Server (`sysname`).
const MAX_IDENTIFIER_LEN: usize = 128;

/// How often and how patiently to retry a fallible connection step.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    pub initial_delay: Duration,
    /// Upper bound for the doubled delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(retries: u32, initial_delay: Duration) -> Self {
        Self {
            retries,
            initial_delay,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Run `operation` until it succeeds or `policy.retries` retries are spent,
/// sleeping between attempts with a doubling delay.
///
/// The last error is returned with the attempt count attached.
///
/// ```no_run
/// # use std::time::Duration;
/// # use ct_replicator::utils::{retry_with_backoff, RetryPolicy};
/// # async fn demo() -> anyhow::Result<()> {
/// let port = retry_with_backoff("probe", RetryPolicy::new(2, Duration::from_millis(200)), || async {
///     Ok::<_, anyhow::Error>(1433)
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<F, Fut, T>(what: &str, policy: RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let attempts = policy.retries + 1;
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if attempt >= attempts {
            return Err(err.context(format!("{} failed after {} attempt(s)", what, attempts)));
        }

        tracing::warn!(
            "{} failed ({}/{}): {:#}; retrying in {:?}",
            what,
            attempt,
            attempts,
            err,
            delay
        );
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(policy.max_delay);
        attempt += 1;
    }
}

/// Validate a table name taken from configuration.
///
/// Table names are interpolated into both T-SQL and BigQuery SQL, so only
/// plain identifiers are accepted:
/// - 1-128 characters
/// - first character is a letter or underscore
/// - remaining characters are letters, digits or underscores
///
/// # Examples
///
/// ```
/// # use ct_replicator::utils::validate_table_name;
/// assert!(validate_table_name("orders").is_ok());
/// assert!(validate_table_name("_staging_2024").is_ok());
/// assert!(validate_table_name("2024_orders").is_err());
/// assert!(validate_table_name("orders; DROP TABLE users; --").is_err());
/// ```
pub fn validate_table_name(identifier: &str) -> Result<()> {
    if identifier.trim().is_empty() {
        bail!("table name is empty");
    }
    if identifier != identifier.trim() {
        bail!("table name has surrounding whitespace");
    }

    if identifier.chars().count() > MAX_IDENTIFIER_LEN {
        bail!(
            "'{}' is longer than {} characters",
            printable_ident(identifier),
            MAX_IDENTIFIER_LEN
        );
    }

    for (i, c) in identifier.chars().enumerate() {
        let allowed = c == '_' || if i == 0 { c.is_ascii_alphabetic() } else { c.is_ascii_alphanumeric() };
        if allowed {
            continue;
        }
        let shown = if c.is_control() {
            format!("\\x{:02x}", c as u32)
        } else {
            c.to_string()
        };
        bail!(
            "'{}' has '{}' at position {}; names start with a letter or underscore and contain only ASCII letters, digits and underscores",
            printable_ident(identifier),
            shown,
            i
        );
    }

    Ok(())
}

/// Printable form of an identifier for error messages: control characters
/// dropped, at most 100 characters.
fn printable_ident(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote a SQL Server identifier with brackets, escaping embedded `]`.
///
/// # Examples
///
/// ```
/// use ct_replicator::utils::quote_tsql_ident;
/// assert_eq!(quote_tsql_ident("orders"), "[orders]");
/// assert_eq!(quote_tsql_ident("odd]name"), "[odd]]name]");
/// ```
pub fn quote_tsql_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('[');
    for ch in identifier.chars() {
        if ch == ']' {
            quoted.push(']');
        }
        quoted.push(ch);
    }
    quoted.push(']');
    quoted
}

/// Quote a BigQuery identifier with backticks, escaping embedded backticks
/// and backslashes.
///
/// # Examples
///
/// ```
/// use ct_replicator::utils::quote_bq_ident;
/// assert_eq!(quote_bq_ident("orders"), "`orders`");
/// assert_eq!(quote_bq_ident("my-project.sales.orders"), "`my-project.sales.orders`");
/// ```
pub fn quote_bq_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('`');
    for ch in identifier.chars() {
        if ch == '`' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('`');
    quoted
}
