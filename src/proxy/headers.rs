/// Request headers removed before a plain HTTP request is forwarded.
pub const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "proxy-authorization",
    "proxy-connection",
    "connection",
    "keep-alive",
];

/// Headers appended to every forwarded request.
pub const ADDED_REQUEST_HEADERS: &[(&str, &str)] = &[("Connection", "Close")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub name: String,
    pub value: Vec<u8>,
}

impl HeaderEntry {
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// Header block keyed by lowercase name, preserving first-seen order and the
/// original casing of each name.
///
/// A repeated header replaces the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderTable {
    entries: Vec<(String, HeaderEntry)>,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: Vec<u8>) {
        let lower = name.to_ascii_lowercase();
        let entry = HeaderEntry {
            name: name.to_string(),
            value,
        };
        match self.entries.iter_mut().find(|(key, _)| *key == lower) {
            Some((_, existing)) => *existing = entry,
            None => self.entries.push((lower, entry)),
        }
    }

    pub fn get(&self, lower_name: &str) -> Option<&HeaderEntry> {
        self.entries
            .iter()
            .find(|(key, _)| key == lower_name)
            .map(|(_, entry)| entry)
    }

    pub fn contains(&self, lower_name: &str) -> bool {
        self.get(lower_name).is_some()
    }

    /// Iterate `(lowercase name, entry)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderEntry)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_keeps_original_name() {
        let mut headers = HeaderTable::new();
        headers.insert("Content-Type", b"text/plain".to_vec());
        let entry = headers.get("content-type").expect("header present");
        assert_eq!(entry.name, "Content-Type");
        assert_eq!(entry.value_str(), Some("text/plain"));
        assert!(!headers.contains("Content-Type"));
    }

    #[test]
    fn duplicate_overwrites_in_place() {
        let mut headers = HeaderTable::new();
        headers.insert("Accept", b"a".to_vec());
        headers.insert("Host", b"h".to_vec());
        headers.insert("ACCEPT", b"b".to_vec());
        assert_eq!(headers.len(), 2);
        let order: Vec<_> = headers.iter().map(|(key, _)| key).collect();
        assert_eq!(order, ["accept", "host"]);
        let accept = headers.get("accept").unwrap();
        assert_eq!(accept.name, "ACCEPT");
        assert_eq!(accept.value, b"b");
    }

    #[test]
    fn forwarding_policy_removes_connection_headers() {
        for name in ["proxy-authorization", "proxy-connection", "connection", "keep-alive"] {
            assert!(STRIPPED_REQUEST_HEADERS.contains(&name));
        }
        assert_eq!(ADDED_REQUEST_HEADERS, &[("Connection", "Close")]);
    }
}
