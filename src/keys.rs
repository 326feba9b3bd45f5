use rand::Rng;

/// Naming scheme for every key a run writes.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Adds a random run suffix so concurrent runs don't share keys.
    pub fn isolated(prefix: &str) -> Self {
        let mut rng = rand::thread_rng();
        Self::new(format!("{}:run-{:08x}", prefix, rng.gen::<u32>()))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn string(&self, id: &str) -> String {
        format!("{}:string:{}", self.prefix, id)
    }

    pub fn counter(&self, column: &str, id: &str) -> String {
        format!("{}:counter:{}:{}", self.prefix, column, id)
    }

    pub fn ids(&self) -> String {
        format!("{}:list:ids", self.prefix)
    }

    pub fn hash(&self, id: &str) -> String {
        format!("{}:hash:{}", self.prefix, id)
    }

    pub fn set_values(&self, column: &str) -> String {
        format!("{}:set:{}", self.prefix, column)
    }

    pub fn set_members(&self, column: &str, value: &str) -> String {
        format!("{}:set:{}:{}", self.prefix, column, value)
    }

    pub fn zset(&self, column: &str) -> String {
        format!("{}:zset:{}", self.prefix, column)
    }

    pub fn pipeline(&self, id: &str) -> String {
        format!("{}:pipeline:{}", self.prefix, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = KeySpace::new("demo");
        assert_eq!(keys.string("4"), "demo:string:4");
        assert_eq!(keys.counter("age", "4"), "demo:counter:age:4");
        assert_eq!(keys.ids(), "demo:list:ids");
        assert_eq!(keys.hash("4"), "demo:hash:4");
        assert_eq!(keys.set_values("team"), "demo:set:team");
        assert_eq!(keys.set_members("team", "core"), "demo:set:team:core");
        assert_eq!(keys.zset("age"), "demo:zset:age");
        assert_eq!(keys.pipeline("4"), "demo:pipeline:4");
    }

    #[test]
    fn test_isolated_prefix() {
        let keys = KeySpace::isolated("demo");
        let suffix = keys.prefix().strip_prefix("demo:run-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
