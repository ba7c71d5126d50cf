//! Queue name validation.
//!
//! Names live in a separate flat namespace (the [`registry`](crate::registry)),
//! not in a filesystem. Like POSIX message queue names they conventionally
//! start with a single '/' and contain no further '/'. Unlike POSIX names
//! they are plain UTF-8 `String`s rather than bytes terminated by a NUL,
//! since nothing here is handed to a C ABI.

use std::borrow::Cow;
use std::fmt;

/// A validated queue name: starts with '/', contains no other '/', non-empty
/// after the leading slash.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueName(String);

impl QueueName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueName({:?})", self.0)
    }
}

/// Prepend '/' if missing; returns a borrowed `Cow` when the input is
/// already well-formed.
///
/// # Panics
///
/// If `name` contains an interior '/' after the first character, or is
/// empty/just "/". A malformed literal name is a coding error, not a
/// runtime condition to recover from, so this panics rather than returning
/// a `Result` — see [`validate`] for the non-panicking counterpart used on
/// the `open`/`unlink` path.
pub fn name_from_str<N: AsRef<str> + ?Sized>(name: &N) -> Cow<'_, str> {
    let name = name.as_ref();
    if name.starts_with('/') && name.len() > 1 && !name[1..].contains('/') {
        return Cow::Borrowed(name);
    }
    let mut owned = String::with_capacity(name.len() + 1);
    if !name.starts_with('/') {
        owned.push('/');
    }
    owned.push_str(name);
    if owned.len() <= 1 || owned[1..].contains('/') {
        panic!("queue name is empty or contains an interior '/'");
    }
    Cow::Owned(owned)
}

/// Validate and wrap a name, without panicking. Used on the `open`/`unlink`
/// fast path where a malformed name is a normal, recoverable error
/// (`Reason::InvalidArgument`) rather than a programmer bug.
pub fn validate(name: &str) -> Result<QueueName, crate::error::Reason> {
    let prefixed = if name.starts_with('/') {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("/{}", name))
    };
    if prefixed.len() <= 1 || prefixed[1..].contains('/') {
        return Err(crate::error::Reason::InvalidArgument(
            "queue name must be non-empty and contain no interior '/'",
        ));
    }
    Ok(QueueName(prefixed.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepends_missing_slash() {
        assert_eq!(name_from_str("hello"), "/hello");
        assert_eq!(name_from_str("/hello"), "/hello");
    }

    #[test]
    #[should_panic]
    fn panics_on_interior_slash() {
        let _ = name_from_str("a/b");
    }

    #[test]
    fn validate_accepts_bare_and_slashed() {
        assert_eq!(validate("/q").unwrap().as_str(), "/q");
        assert_eq!(validate("q").unwrap().as_str(), "/q");
    }

    #[test]
    fn validate_rejects_interior_slash_and_empty() {
        assert!(validate("/a/b").is_err());
        assert!(validate("/").is_err());
        assert!(validate("").is_err());
    }
}
