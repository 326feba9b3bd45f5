use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::commands::Command;
use crate::errors::StoreError;

/// The subset of Redis the scenarios need.
#[async_trait]
pub trait Store: Send {
    /// Sends one command in its own round trip.
    async fn apply(&mut self, cmd: &Command) -> Result<(), StoreError>;

    /// Sends a batch in a single round trip. No-op commands are skipped.
    async fn apply_pipelined(&mut self, cmds: &[Command]) -> Result<(), StoreError>;

    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remaining time to live in seconds; `None` for a missing or persistent key.
    async fn ttl(&mut self, key: &str) -> Result<Option<u64>, StoreError>;

    async fn lrange_all(&mut self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Removes and returns the head of a list. The key goes away with its last element.
    async fn lpop(&mut self, key: &str) -> Result<Option<String>, StoreError>;

    async fn hgetall(&mut self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn smembers(&mut self, key: &str) -> Result<HashSet<String>, StoreError>;

    /// Members in ascending score order, ties broken by member.
    async fn zrange_withscores(&mut self, key: &str) -> Result<Vec<(String, f64)>, StoreError>;

    async fn zrevrange_withscores(&mut self, key: &str)
        -> Result<Vec<(String, f64)>, StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    SortedSet(HashMap<String, f64>),
}

#[derive(Debug)]
struct Item {
    value: Value,
    expiry: Option<Instant>,
}

impl Item {
    fn is_expired(&self) -> bool {
        self.expiry.map_or(false, |at| at <= Instant::now())
    }
}

/// In-process stand-in for a Redis server. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, Item>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let mut data = self.lock();
        data.retain(|_, item| !item.is_expired());
        data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read(key, |_| ()).is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Item>> {
        // a poisoned map is still structurally valid
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read<T>(&self, key: &str, f: impl FnOnce(&Value) -> T) -> Option<T> {
        let mut data = self.lock();
        if data.get(key).map_or(false, Item::is_expired) {
            data.remove(key);
            return None;
        }
        data.get(key).map(|item| f(&item.value))
    }

    /// Runs `f` on the value at `key`, creating it with `init` when absent.
    fn modify(
        &self,
        key: &str,
        init: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> bool,
    ) -> Result<(), StoreError> {
        let mut data = self.lock();
        if data.get(key).map_or(false, Item::is_expired) {
            data.remove(key);
        }
        let item = data.entry(key.to_string()).or_insert_with(|| Item {
            value: init(),
            expiry: None,
        });
        if f(&mut item.value) {
            Ok(())
        } else {
            Err(StoreError::WrongType(key.to_string()))
        }
    }

    fn execute(&self, cmd: &Command) -> Result<(), StoreError> {
        match cmd {
            Command::Set(key, value, ttl) => {
                let item = Item {
                    value: Value::Text(value.clone()),
                    expiry: ttl.map(|secs| Instant::now() + Duration::from_secs(secs)),
                };
                self.lock().insert(key.clone(), item);
                Ok(())
            }
            Command::IncrBy(key, amount) => {
                let mut data = self.lock();
                if data.get(key).map_or(false, Item::is_expired) {
                    data.remove(key);
                }
                // INCRBY keeps any expiry already set on the key
                let item = data.entry(key.to_string()).or_insert_with(|| Item {
                    value: Value::Text("0".to_owned()),
                    expiry: None,
                });
                match &mut item.value {
                    Value::Text(text) => {
                        let next = text
                            .parse::<i64>()
                            .ok()
                            .and_then(|current| current.checked_add(*amount))
                            .ok_or_else(|| StoreError::NotInteger(key.to_string()))?;
                        *text = next.to_string();
                        Ok(())
                    }
                    _ => Err(StoreError::WrongType(key.to_string())),
                }
            }
            Command::RPush(key, values) => self.modify(
                key,
                || Value::List(VecDeque::new()),
                |value| match value {
                    Value::List(list) => {
                        list.extend(values.iter().cloned());
                        true
                    }
                    _ => false,
                },
            ),
            Command::HSet(key, pairs) => self.modify(
                key,
                || Value::Hash(HashMap::new()),
                |value| match value {
                    Value::Hash(hash) => {
                        hash.extend(pairs.iter().cloned());
                        true
                    }
                    _ => false,
                },
            ),
            Command::SAdd(key, members) => self.modify(
                key,
                || Value::Set(HashSet::new()),
                |value| match value {
                    Value::Set(set) => {
                        set.extend(members.iter().cloned());
                        true
                    }
                    _ => false,
                },
            ),
            Command::ZAdd(key, pairs) => self.modify(
                key,
                || Value::SortedSet(HashMap::new()),
                |value| match value {
                    Value::SortedSet(zset) => {
                        for (score, member) in pairs {
                            zset.insert(member.clone(), *score);
                        }
                        true
                    }
                    _ => false,
                },
            ),
            Command::Del(keys) => {
                let mut data = self.lock();
                for key in keys {
                    data.remove(key);
                }
                Ok(())
            }
        }
    }

    fn read_typed<T: Default>(
        &self,
        key: &str,
        f: impl FnOnce(&Value) -> Option<T>,
    ) -> Result<T, StoreError> {
        match self.read(key, f) {
            None => Ok(T::default()),
            Some(Some(v)) => Ok(v),
            Some(None) => Err(StoreError::WrongType(key.to_string())),
        }
    }
}

/// Redis ordering for sorted set members: score, then member bytes.
pub fn by_score(a: &(String, f64), b: &(String, f64)) -> Ordering {
    a.1.partial_cmp(&b.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.cmp(&b.0))
}

#[async_trait]
impl Store for MemoryStore {
    async fn apply(&mut self, cmd: &Command) -> Result<(), StoreError> {
        if cmd.is_noop() {
            return Ok(());
        }
        self.execute(cmd)
    }

    async fn apply_pipelined(&mut self, cmds: &[Command]) -> Result<(), StoreError> {
        for cmd in cmds.iter().filter(|c| !c.is_noop()) {
            self.execute(cmd)?;
        }
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        self.read_typed(key, |value| match value {
            Value::Text(text) => Some(Some(text.clone())),
            _ => None,
        })
    }

    async fn ttl(&mut self, key: &str) -> Result<Option<u64>, StoreError> {
        let data = self.lock();
        let remaining = data.get(key).and_then(|item| item.expiry).and_then(|at| {
            let now = Instant::now();
            // Redis rounds the remaining milliseconds to the nearest second
            (at > now).then(|| ((at - now).as_millis() as u64 + 500) / 1000)
        });
        Ok(remaining)
    }

    async fn lrange_all(&mut self, key: &str) -> Result<Vec<String>, StoreError> {
        self.read_typed(key, |value| match value {
            Value::List(list) => Some(list.iter().cloned().collect()),
            _ => None,
        })
    }

    async fn lpop(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        let mut data = self.lock();
        if data.get(key).map_or(false, Item::is_expired) {
            data.remove(key);
        }
        let (head, drained) = match data.get_mut(key).map(|item| &mut item.value) {
            None => return Ok(None),
            Some(Value::List(list)) => (list.pop_front(), list.is_empty()),
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        if drained {
            data.remove(key);
        }
        Ok(head)
    }

    async fn hgetall(&mut self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.read_typed(key, |value| match value {
            Value::Hash(hash) => Some(hash.clone()),
            _ => None,
        })
    }

    async fn smembers(&mut self, key: &str) -> Result<HashSet<String>, StoreError> {
        self.read_typed(key, |value| match value {
            Value::Set(set) => Some(set.clone()),
            _ => None,
        })
    }

    async fn zrange_withscores(&mut self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        self.read_typed(key, |value| match value {
            Value::SortedSet(zset) => {
                let mut members: Vec<(String, f64)> =
                    zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
                members.sort_by(|a, b| by_score(a, b));
                Some(members)
            }
            _ => None,
        })
    }

    async fn zrevrange_withscores(
        &mut self,
        key: &str,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let mut members = self.zrange_withscores(key).await?;
        members.reverse();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let mut store = MemoryStore::new();

        store
            .apply(&Command::Set("key1".to_owned(), "value1".to_owned(), None))
            .await
            .unwrap();

        assert_eq!(store.get("key1").await.unwrap(), Some("value1".to_owned()));
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert_eq!(store.ttl("key1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expire_and_ttl() {
        let mut store = MemoryStore::new();

        store
            .apply(&Command::Set("key1".to_owned(), "value1".to_owned(), Some(1)))
            .await
            .unwrap();
        assert_eq!(store.ttl("key1").await.unwrap(), Some(1));

        std::thread::sleep(Duration::from_millis(1100));

        assert_eq!(store.ttl("key1").await.unwrap(), None);
        assert_eq!(store.get("key1").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_list_keeps_push_order() {
        let mut store = MemoryStore::new();
        let cmds = vec![
            Command::RPush("l".to_owned(), strings(&["a", "b"])),
            Command::RPush("l".to_owned(), strings(&["c"])),
        ];
        store.apply_pipelined(&cmds).await.unwrap();

        assert_eq!(store.lrange_all("l").await.unwrap(), strings(&["a", "b", "c"]));
        assert!(store.lrange_all("none").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lpop_drains_and_removes_list() {
        let mut store = MemoryStore::new();
        store
            .apply(&Command::RPush("l".to_owned(), strings(&["a", "b"])))
            .await
            .unwrap();

        assert_eq!(store.lpop("l").await.unwrap(), Some("a".to_owned()));
        assert_eq!(store.lpop("l").await.unwrap(), Some("b".to_owned()));
        assert!(!store.contains("l"));
        assert_eq!(store.lpop("l").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incrby() {
        let mut store = MemoryStore::new();
        store
            .apply(&Command::Set("n".to_owned(), "40".to_owned(), Some(60)))
            .await
            .unwrap();
        store.apply(&Command::IncrBy("n".to_owned(), 10)).await.unwrap();
        store.apply(&Command::IncrBy("fresh".to_owned(), -2)).await.unwrap();

        assert_eq!(store.get("n").await.unwrap(), Some("50".to_owned()));
        assert_eq!(store.ttl("n").await.unwrap(), Some(60));
        assert_eq!(store.get("fresh").await.unwrap(), Some("-2".to_owned()));
    }

    #[tokio::test]
    async fn test_incrby_rejects_non_integers() {
        let mut store = MemoryStore::new();
        store
            .apply(&Command::Set("n".to_owned(), "4.5".to_owned(), None))
            .await
            .unwrap();
        store
            .apply(&Command::Set("max".to_owned(), i64::MAX.to_string(), None))
            .await
            .unwrap();

        let res = store.apply(&Command::IncrBy("n".to_owned(), 1)).await;
        assert!(matches!(res, Err(StoreError::NotInteger(_))));
        let res = store.apply(&Command::IncrBy("max".to_owned(), 1)).await;
        assert!(matches!(res, Err(StoreError::NotInteger(_))));
        assert_eq!(store.get("n").await.unwrap(), Some("4.5".to_owned()));
    }

    #[tokio::test]
    async fn test_hash_and_set() {
        let mut store = MemoryStore::new();
        store
            .apply(&Command::HSet(
                "h".to_owned(),
                vec![("name".to_owned(), "ada".to_owned())],
            ))
            .await
            .unwrap();
        store
            .apply(&Command::SAdd("s".to_owned(), strings(&["x", "y", "x"])))
            .await
            .unwrap();

        let hash = store.hgetall("h").await.unwrap();
        assert_eq!(hash.get("name").map(String::as_str), Some("ada"));

        let set = store.smembers("s").await.unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("x") && set.contains("y"));
    }

    #[tokio::test]
    async fn test_sorted_set_order() {
        let mut store = MemoryStore::new();
        store
            .apply(&Command::ZAdd(
                "z".to_owned(),
                vec![
                    (3.0, "c".to_owned()),
                    (1.0, "b".to_owned()),
                    (1.0, "a".to_owned()),
                    (2.0, "c".to_owned()),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(
            store.zrange_withscores("z").await.unwrap(),
            vec![
                ("a".to_owned(), 1.0),
                ("b".to_owned(), 1.0),
                ("c".to_owned(), 2.0)
            ]
        );
        assert_eq!(
            store.zrevrange_withscores("z").await.unwrap()[0],
            ("c".to_owned(), 2.0)
        );
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let mut store = MemoryStore::new();
        store
            .apply(&Command::Set("k".to_owned(), "v".to_owned(), None))
            .await
            .unwrap();

        let res = store
            .apply(&Command::RPush("k".to_owned(), strings(&["a"])))
            .await;
        assert!(matches!(res, Err(StoreError::WrongType(_))));
        assert!(matches!(store.hgetall("k").await, Err(StoreError::WrongType(_))));
    }

    #[tokio::test]
    async fn test_del_and_shared_clones() {
        let mut store = MemoryStore::new();
        let view = store.clone();

        store
            .apply(&Command::Set("a".to_owned(), "1".to_owned(), None))
            .await
            .unwrap();
        assert!(view.contains("a"));

        store
            .apply(&Command::Del(strings(&["a", "missing"])))
            .await
            .unwrap();
        assert!(!view.contains("a"));
    }

    #[tokio::test]
    async fn test_noop_commands_create_nothing() {
        let mut store = MemoryStore::new();
        store.apply(&Command::SAdd("s".to_owned(), vec![])).await.unwrap();
        assert!(!store.contains("s"));
    }
}
