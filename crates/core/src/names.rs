//! Pure helpers for parsing source columns and deriving entry attributes.
//!
//! Nothing in here touches the directory or the database.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};

/// Hash tag written by the mail server's crypt(3) SHA-512 scheme.
pub const SOURCE_CRYPT_TAG: &str = "{SHA512-CRYPT}";

/// Tag OpenLDAP uses for every crypt(3) format.
pub const DIRECTORY_CRYPT_TAG: &str = "{CRYPT}";

/// Split `text` on any of `delimiters`, trim every token, drop empty ones and
/// drop repeats. Tokens keep the order of their first occurrence.
///
/// Malformed input never fails; anything that trims to nothing is dropped.
pub fn split_tokens(text: &str, delimiters: &[char]) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| delimiters.contains(&c))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter(|token| seen.insert(*token))
        .map(str::to_string)
        .collect()
}

/// Parse the newline-separated `privileges` column.
pub fn parse_privileges(text: &str) -> BTreeSet<String> {
    split_tokens(text, &['\n']).into_iter().collect()
}

/// Split an address into its local part and, when there is an `@`, its
/// domain part. The split happens at the last `@`.
pub fn split_address(email: &str) -> (&str, Option<&str>) {
    match email.rsplit_once('@') {
        Some((local, domain)) => (local, Some(domain)),
        None => (email, None),
    }
}

/// Common name derived from the local part: `.` and `_` become spaces.
pub fn common_name_from_email(email: &str) -> String {
    let (local, _) = split_address(email);
    local.replace(['.', '_'], " ")
}

/// Surname heuristic: everything after the first space of the common name,
/// or the empty string when there is no space.
pub fn surname_of(common_name: &str) -> &str {
    match common_name.split_once(' ') {
        Some((_, rest)) => rest,
        None => "",
    }
}

/// Rewrite the source crypt tag to the directory's; any other hash is
/// returned unchanged.
pub fn transcode_password_hash(hash: &str) -> Cow<'_, str> {
    match hash.strip_prefix(SOURCE_CRYPT_TAG) {
        Some(rest) => Cow::Owned(format!("{DIRECTORY_CRYPT_TAG}{rest}")),
        None => Cow::Borrowed(hash),
    }
}
