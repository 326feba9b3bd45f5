/*
    SET <Key> <Value> [EX <TTL>] : Store a record as a JSON string.
    INCRBY <Key> <Amount>        : Bump an integer counter.
    RPUSH <Key> <elements...>    : Append ids to a list.
    HSET <Key> <field value...>  : Store a record as a hash.
    SADD <Key> <members...>      : Add members to a set.
    ZADD <Key> <score member...> : Add scored members to a sorted set.
    DEL <Keys...>                : Remove keys written by a run.
 */

/// A write issued by a scenario.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set(String, String, Option<u64>),
    IncrBy(String, i64),
    RPush(String, Vec<String>),
    HSet(String, Vec<(String, String)>),
    SAdd(String, Vec<String>),
    ZAdd(String, Vec<(f64, String)>),
    Del(Vec<String>),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Set(..) => "SET",
            Command::IncrBy(..) => "INCRBY",
            Command::RPush(..) => "RPUSH",
            Command::HSet(..) => "HSET",
            Command::SAdd(..) => "SADD",
            Command::ZAdd(..) => "ZADD",
            Command::Del(..) => "DEL",
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        match self {
            Command::Set(key, ..)
            | Command::IncrBy(key, _)
            | Command::RPush(key, _)
            | Command::HSet(key, _)
            | Command::SAdd(key, _)
            | Command::ZAdd(key, _) => vec![key.as_str()],
            Command::Del(keys) => keys.iter().map(String::as_str).collect(),
        }
    }

    /// Redis rejects these with an arity error, so they are never sent.
    pub fn is_noop(&self) -> bool {
        match self {
            Command::Set(..) | Command::IncrBy(..) => false,
            Command::RPush(_, values) | Command::SAdd(_, values) | Command::Del(values) => {
                values.is_empty()
            }
            Command::HSet(_, pairs) => pairs.is_empty(),
            Command::ZAdd(_, pairs) => pairs.is_empty(),
        }
    }

    pub fn to_cmd(&self) -> redis::Cmd {
        let mut cmd = redis::cmd(self.name());
        match self {
            Command::Set(key, value, ttl) => {
                cmd.arg(key).arg(value);
                if let Some(secs) = ttl {
                    cmd.arg("EX").arg(*secs);
                }
            }
            Command::IncrBy(key, amount) => {
                cmd.arg(key).arg(*amount);
            }
            Command::RPush(key, values) | Command::SAdd(key, values) => {
                cmd.arg(key).arg(values);
            }
            Command::HSet(key, pairs) => {
                cmd.arg(key);
                for (field, value) in pairs {
                    cmd.arg(field).arg(value);
                }
            }
            Command::ZAdd(key, pairs) => {
                cmd.arg(key);
                for (score, member) in pairs {
                    cmd.arg(*score).arg(member);
                }
            }
            Command::Del(keys) => {
                cmd.arg(keys);
            }
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &redis::Cmd) -> Vec<String> {
        cmd.args_iter()
            .map(|arg| match arg {
                redis::Arg::Simple(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                redis::Arg::Cursor => "<cursor>".to_owned(),
            })
            .collect()
    }

    #[test]
    fn test_set_with_expiry() {
        let cmd = Command::Set("k".to_owned(), "v".to_owned(), Some(60)).to_cmd();
        assert_eq!(args(&cmd), vec!["SET", "k", "v", "EX", "60"]);

        let cmd = Command::Set("k".to_owned(), "v".to_owned(), None).to_cmd();
        assert_eq!(args(&cmd), vec!["SET", "k", "v"]);
    }

    #[test]
    fn test_incrby_takes_signed_amount() {
        let cmd = Command::IncrBy("age".to_owned(), -3).to_cmd();
        assert_eq!(args(&cmd), vec!["INCRBY", "age", "-3"]);
        assert!(!Command::IncrBy("age".to_owned(), 0).is_noop());
    }

    #[test]
    fn test_hset_flattens_pairs() {
        let cmd = Command::HSet(
            "h".to_owned(),
            vec![("a".to_owned(), "1".to_owned()), ("b".to_owned(), "2".to_owned())],
        )
        .to_cmd();
        assert_eq!(args(&cmd), vec!["HSET", "h", "a", "1", "b", "2"]);
    }

    #[test]
    fn test_zadd_puts_score_first() {
        let cmd = Command::ZAdd("z".to_owned(), vec![(1.5, "m".to_owned())]).to_cmd();
        assert_eq!(args(&cmd), vec!["ZADD", "z", "1.5", "m"]);
    }

    #[test]
    fn test_del_and_rpush_expand_lists() {
        let keys = vec!["a".to_owned(), "b".to_owned()];
        assert_eq!(args(&Command::Del(keys.clone()).to_cmd()), vec!["DEL", "a", "b"]);
        assert_eq!(
            args(&Command::RPush("l".to_owned(), keys).to_cmd()),
            vec!["RPUSH", "l", "a", "b"]
        );
    }

    #[test]
    fn test_keys_and_noop() {
        let del = Command::Del(vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(del.keys(), vec!["a", "b"]);
        assert!(!del.is_noop());

        assert!(Command::SAdd("s".to_owned(), vec![]).is_noop());
        assert!(Command::ZAdd("z".to_owned(), vec![]).is_noop());
        assert!(!Command::Set("k".to_owned(), String::new(), None).is_noop());
    }
}
