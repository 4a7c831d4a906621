//! Request parameters as an ordered multi-map.

/// Query-string style parameters. Keys may repeat; order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse `key=value` items such as command-line arguments.
    ///
    /// Items without `=` become keys with an empty value.
    pub fn from_assignments<S: AsRef<str>>(items: &[S]) -> Self {
        Self::from_pairs(items.iter().map(|item| {
            let item = item.as_ref();
            match item.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (item.to_string(), String::new()),
            }
        }))
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    /// The last value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parameters whose key starts with `prefix`, with the prefix removed.
    pub fn strip_prefix(&self, prefix: &str) -> RequestParams {
        Self {
            pairs: self
                .pairs
                .iter()
                .filter_map(|(k, v)| k.strip_prefix(prefix).map(|s| (s.to_string(), v.clone())))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_value_wins_and_all_values_kept() {
        let params = RequestParams::from_pairs([("a", "1"), ("b", "2"), ("a", "3")]);
        assert_eq!(params.get("a"), Some("3"));
        assert_eq!(params.get_all("a").collect::<Vec<_>>(), vec!["1", "3"]);
        assert_eq!(params.get("c"), None);
    }

    #[test]
    fn prefix_is_stripped_and_others_dropped() {
        let params = RequestParams::from_assignments(&["s_q=soil", "t_q=x", "s_page"]);
        let scoped = params.strip_prefix("s_");
        assert_eq!(scoped.get("q"), Some("soil"));
        assert_eq!(scoped.get("page"), Some(""));
        assert_eq!(scoped.iter().count(), 2);
    }
}
