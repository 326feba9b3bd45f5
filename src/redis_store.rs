use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, instrument};

use crate::commands::Command;
use crate::errors::StoreError;
use crate::store::Store;

/// `Store` backed by a live Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    pub async fn ping(&mut self) -> Result<(), StoreError> {
        let _: String = redis::cmd("PING").query_async(&mut self.conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for RedisStore {
    #[instrument(skip(self, cmd), fields(cmd = cmd.name()))]
    async fn apply(&mut self, cmd: &Command) -> Result<(), StoreError> {
        if cmd.is_noop() {
            return Ok(());
        }
        let _: () = cmd.to_cmd().query_async(&mut self.conn).await?;
        Ok(())
    }

    async fn apply_pipelined(&mut self, cmds: &[Command]) -> Result<(), StoreError> {
        let mut pipe = redis::pipe();
        let mut queued = 0;
        for cmd in cmds.iter().filter(|c| !c.is_noop()) {
            pipe.add_command(cmd.to_cmd()).ignore();
            queued += 1;
        }
        if queued == 0 {
            return Ok(());
        }

        debug!(queued, "sending pipeline");
        let _: () = pipe.query_async(&mut self.conn).await?;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn.get(key).await?)
    }

    async fn ttl(&mut self, key: &str) -> Result<Option<u64>, StoreError> {
        // -2 for a missing key, -1 for a key without expiry
        let secs: i64 = self.conn.ttl(key).await?;
        Ok(u64::try_from(secs).ok())
    }

    async fn lrange_all(&mut self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.conn.lrange(key, 0, -1).await?)
    }

    async fn lpop(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn.lpop(key, None).await?)
    }

    async fn hgetall(&mut self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.conn.hgetall(key).await?)
    }

    async fn smembers(&mut self, key: &str) -> Result<HashSet<String>, StoreError> {
        Ok(self.conn.smembers(key).await?)
    }

    async fn zrange_withscores(&mut self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        Ok(self.conn.zrange_withscores(key, 0, -1).await?)
    }

    async fn zrevrange_withscores(
        &mut self,
        key: &str,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        Ok(self.conn.zrevrange_withscores(key, 0, -1).await?)
    }
}
