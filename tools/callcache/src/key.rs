use std::fmt;
use uuid::Uuid;

/// Handle returned by `Cache::store`: a random UUID v4 in hyphenated form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::Key;
    use std::collections::HashSet;
    use uuid::Uuid;

    #[test]
    fn generated_keys_are_hyphenated_v4_uuids() {
        let key = Key::generate();
        assert_eq!(key.as_str().len(), 36);
        let parsed = Uuid::parse_str(key.as_str()).expect("uuid");
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn generated_keys_do_not_repeat() {
        let keys = (0..500).map(|_| Key::generate()).collect::<HashSet<_>>();
        assert_eq!(keys.len(), 500);
    }
}
