//! Ordered, case-insensitive header list for batched operations.

/// Headers of one batched operation.
///
/// Keys compare case-insensitively, insertion order is kept, and repeated
/// names are preserved so a payload can be written back exactly as read.
///
/// ```
/// use odata_batch::HeaderList;
///
/// let mut headers = HeaderList::new();
/// headers.append("Accept", "application/json");
/// headers.append("Prefer", "return=minimal");
/// headers.append("prefer", "odata.continue-on-error");
///
/// assert_eq!(headers.get("ACCEPT"), Some("application/json"));
/// assert_eq!(headers.get_all("Prefer").count(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header after all existing ones, keeping earlier values of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Sets a header, replacing every existing value of the same name.
    ///
    /// The new value takes the position of the first replaced entry.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => {
                self.entries[idx] = (name.clone(), value);
                let mut seen = 0usize;
                self.entries.retain(|(k, _)| {
                    if k.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Removes every value for `name`, returning the first one.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let first = self.get(name).map(str::to_string);
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        first
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shorthand for the `Content-Type` value.
    pub fn content_type(&self) -> Option<&str> {
        self.get(crate::batch::protocol::constants::headers::CONTENT_TYPE)
    }

    /// Compares two lists ignoring key case and the relative order of distinct names.
    ///
    /// Values, and the order of repeated values under one name, must match exactly.
    pub fn equivalent(&self, other: &HeaderList) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.entries.iter().all(|(name, _)| {
            self.get_all(name).eq(other.get_all(name))
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HeaderList::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_is_case_insensitive() {
        let headers: HeaderList = [("Content-Type", "application/json")].into_iter().collect();
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.content_type(), Some("application/json"));
    }

    #[test]
    fn test_append_preserves_duplicates_in_order() {
        let mut headers = HeaderList::new();
        headers.append("Prefer", "a");
        headers.append("Accept", "b");
        headers.append("PREFER", "c");
        let prefer: Vec<_> = headers.get_all("prefer").collect();
        assert_eq!(prefer, vec!["a", "c"]);
        let names: Vec<_> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["Prefer", "Accept", "PREFER"]);
    }

    #[test]
    fn test_insert_replaces_all_values() {
        let mut headers = HeaderList::new();
        headers.append("A", "1");
        headers.append("B", "2");
        headers.append("a", "3");
        headers.insert("a", "4");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get_all("A").collect::<Vec<_>>(), vec!["4"]);
        assert_eq!(headers.iter().next(), Some(("a", "4")));
    }

    #[test]
    fn test_remove() {
        let mut headers = HeaderList::new();
        headers.append("X", "1");
        headers.append("x", "2");
        assert_eq!(headers.remove("X"), Some("1".to_string()));
        assert!(headers.is_empty());
        assert_eq!(headers.remove("X"), None);
    }

    #[test]
    fn test_equivalent_ignores_case_and_name_order() {
        let a: HeaderList = [("Accept", "json"), ("Prefer", "x")].into_iter().collect();
        let b: HeaderList = [("prefer", "x"), ("accept", "json")].into_iter().collect();
        assert!(a.equivalent(&b));

        let c: HeaderList = [("prefer", "y"), ("accept", "json")].into_iter().collect();
        assert!(!a.equivalent(&c));
    }
}
