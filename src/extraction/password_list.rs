use tracing::debug;

/// Ordered, de-duplicated list of passwords to try against an archive
///
/// Order is: configured defaults, then request-specific passwords, then the
/// empty password (when enabled). With nothing configured the empty password
/// is always the single candidate, so unencrypted archives still extract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordList {
    passwords: Vec<String>,
}

impl PasswordList {
    /// Collect passwords from the configured defaults and a request
    pub fn collect<'a>(
        defaults: impl IntoIterator<Item = &'a String>,
        request: impl IntoIterator<Item = &'a String>,
        try_empty: bool,
    ) -> Self {
        let mut passwords: Vec<String> = Vec::new();

        for pw in defaults.into_iter().chain(request) {
            if !passwords.iter().any(|p| p == pw) {
                passwords.push(pw.clone());
            }
        }

        // Empty password last
        if passwords.is_empty() || (try_empty && !passwords.iter().any(|p| p.is_empty())) {
            passwords.push(String::new());
        }

        debug!(
            "collected {} unique passwords for extraction",
            passwords.len()
        );

        Self { passwords }
    }

    /// Passwords already combined by the caller
    pub fn from_combined(combined: &[String], try_empty: bool) -> Self {
        Self::collect(combined, std::iter::empty(), try_empty)
    }

    /// Get an iterator over passwords
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.passwords.iter()
    }

    /// Check if there are any passwords to try
    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }

    /// Get the number of passwords
    pub fn len(&self) -> usize {
        self.passwords.len()
    }
}
