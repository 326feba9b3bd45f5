use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::commands::Command;
use crate::config::Config;
use crate::dataset::{parse_score, Dataset};
use crate::errors::ServiceError;
use crate::keys::KeySpace;
use crate::pubsub::{self, PubSub};
use crate::report::{Report, Scenario};
use crate::serializer;
use crate::store::{by_score, Store};

const MISSING: &str = "<missing>";
const ABSENT: &str = "<absent>";

#[derive(Debug, Clone)]
pub struct ShowcaseOptions {
    pub channel: String,
    pub set_column: Option<String>,
    pub score_column: Option<String>,
    pub ttl_secs: Option<u64>,
    pub increment: i64,
    pub publish_count: Option<usize>,
    pub subscribe_timeout: Duration,
    pub pipeline_batch: usize,
}

impl Default for ShowcaseOptions {
    fn default() -> Self {
        Self {
            channel: "showcase:records".to_owned(),
            set_column: None,
            score_column: None,
            ttl_secs: None,
            increment: 10,
            publish_count: None,
            subscribe_timeout: Duration::from_secs(2),
            pipeline_batch: 100,
        }
    }
}

impl From<&Config> for ShowcaseOptions {
    fn from(config: &Config) -> Self {
        Self {
            channel: config.channel.clone(),
            set_column: config.set_column.clone(),
            score_column: config.score_column.clone(),
            ttl_secs: config.ttl_secs,
            increment: config.increment,
            publish_count: config.publish_count,
            subscribe_timeout: config.subscribe_timeout(),
            pipeline_batch: config.pipeline_batch,
        }
    }
}

/// Writes a dataset into each Redis data type and checks it reads back intact.
pub struct Showcase<S: Store, P: PubSub> {
    store: S,
    pubsub: P,
    dataset: Arc<Dataset>,
    keys: KeySpace,
    opts: ShowcaseOptions,
    written: BTreeSet<String>,
}

impl<S: Store, P: PubSub> Showcase<S, P> {
    pub fn new(
        store: S,
        pubsub: P,
        dataset: Dataset,
        keys: KeySpace,
        mut opts: ShowcaseOptions,
    ) -> Result<Self, ServiceError> {
        for column in [&opts.set_column, &opts.score_column].into_iter().flatten() {
            if !dataset.has_column(column) {
                return Err(ServiceError::UnknownColumn(column.clone()));
            }
        }
        opts.pipeline_batch = opts.pipeline_batch.max(1);

        Ok(Self {
            store,
            pubsub,
            dataset: Arc::new(dataset),
            keys,
            opts,
            written: BTreeSet::new(),
        })
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    /// Keys written so far and not yet cleaned up.
    pub fn written_keys(&self) -> impl Iterator<Item = &str> {
        self.written.iter().map(String::as_str)
    }

    /// Runs the scenarios in canonical order, whatever order they were given in.
    pub async fn run(&mut self, scenarios: &[Scenario]) -> Result<Vec<Report>, ServiceError> {
        let ordered: BTreeSet<Scenario> = scenarios.iter().copied().collect();
        let mut reports = Vec::with_capacity(ordered.len());

        for scenario in ordered {
            let started = Instant::now();
            let mut report = self.run_one(scenario).await?;
            report.elapsed = started.elapsed();

            info!(
                %scenario,
                written = report.written,
                checked = report.checked,
                mismatches = report.mismatches.len(),
                "scenario finished"
            );
            for mismatch in &report.mismatches {
                debug!(%scenario, %mismatch, "mismatch");
            }
            reports.push(report);
        }

        Ok(reports)
    }

    pub async fn run_one(&mut self, scenario: Scenario) -> Result<Report, ServiceError> {
        match scenario {
            Scenario::Strings => self.strings().await,
            Scenario::Counters => self.counters().await,
            Scenario::Lists => self.lists().await,
            Scenario::Hashes => self.hashes().await,
            Scenario::Sets => self.sets().await,
            Scenario::SortedSets => self.sorted_sets().await,
            Scenario::Pipeline => self.pipeline().await,
            Scenario::Pubsub => self.pubsub().await,
        }
    }

    /// Deletes every key written by this run.
    pub async fn cleanup(&mut self) -> Result<usize, ServiceError> {
        let keys: Vec<String> = std::mem::take(&mut self.written).into_iter().collect();
        for chunk in keys.chunks(500) {
            self.store.apply(&Command::Del(chunk.to_vec())).await?;
        }
        info!(keys = keys.len(), "cleaned up");
        Ok(keys.len())
    }

    async fn reset(&mut self, keys: Vec<String>) -> Result<(), ServiceError> {
        let cmd = Command::Del(keys);
        if !cmd.is_noop() {
            self.store.apply(&cmd).await?;
        }
        Ok(())
    }

    async fn write(&mut self, cmd: Command, report: &mut Report) -> Result<(), ServiceError> {
        if cmd.is_noop() {
            return Ok(());
        }
        // tracked first: a write cancelled mid round trip may still land
        self.track(&cmd);
        self.store.apply(&cmd).await?;
        report.written += 1;
        Ok(())
    }

    fn track(&mut self, cmd: &Command) {
        if !matches!(cmd, Command::Del(_)) && !cmd.is_noop() {
            self.written.extend(cmd.keys().into_iter().map(str::to_owned));
        }
    }

    #[instrument(skip(self))]
    async fn strings(&mut self) -> Result<Report, ServiceError> {
        let mut report = Report::new(Scenario::Strings);
        let dataset = Arc::clone(&self.dataset);
        let keys: Vec<String> = dataset.records.iter().map(|r| self.keys.string(&r.id)).collect();
        self.reset(keys.clone()).await?;

        for (record, key) in dataset.records.iter().zip(&keys) {
            let payload = serializer::encode(record)?;
            self.write(Command::Set(key.clone(), payload, self.opts.ttl_secs), &mut report)
                .await?;
        }

        for (record, key) in dataset.records.iter().zip(&keys) {
            report.checked += 1;
            match self.store.get(key).await? {
                None => report.mismatch(key, "record json", MISSING),
                Some(payload) => match serializer::decode(&payload) {
                    Ok(stored) => compare_fields(key, &record.as_map(), &stored, &mut report),
                    Err(err) => report.mismatch(key, "a JSON object", format!("{:?} ({})", payload, err)),
                },
            }

            if let Some(ttl) = self.opts.ttl_secs {
                match self.store.ttl(key).await? {
                    Some(left) if (1..=ttl).contains(&left) => {}
                    other => report.mismatch(
                        format!("{} (ttl)", key),
                        format!("1..={}s", ttl),
                        other.map_or_else(|| "no expiry".to_owned(), |secs| format!("{}s", secs)),
                    ),
                }
            }
        }

        Ok(report)
    }

    #[instrument(skip(self))]
    async fn counters(&mut self) -> Result<Report, ServiceError> {
        let mut report = Report::new(Scenario::Counters);
        let dataset = Arc::clone(&self.dataset);
        let increment = self.opts.increment;

        let column = match self.score_column(&dataset) {
            Some(column) => column,
            None => {
                report.note("no numeric column to count with, nothing written");
                return Ok(report);
            }
        };

        // id -> starting value, rounded to the nearest integer
        let mut counters = Vec::new();
        let mut skipped = 0;
        for (id, value) in dataset.column(&column) {
            match parse_score(value).and_then(|score| to_counter(score, increment)) {
                Some(start) => counters.push((self.keys.counter(&column, id), start)),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            report.note(format!(
                "{} record(s) with a `{}` unusable as a counter skipped",
                skipped, column
            ));
        }

        self.reset(counters.iter().map(|(key, _)| key.clone()).collect())
            .await?;

        for (key, start) in &counters {
            self.write(Command::Set(key.clone(), start.to_string(), None), &mut report)
                .await?;
        }
        for (key, _) in &counters {
            self.write(Command::IncrBy(key.clone(), increment), &mut report)
                .await?;
        }

        for (key, start) in &counters {
            report.checked += 1;
            let want = start + increment;
            match self.store.get(key).await? {
                Some(got) if got.parse::<i64>() == Ok(want) => {}
                Some(got) => report.mismatch(key, want.to_string(), format!("{:?}", got)),
                None => report.mismatch(key, want.to_string(), MISSING),
            }
        }

        Ok(report)
    }

    #[instrument(skip(self))]
    async fn lists(&mut self) -> Result<Report, ServiceError> {
        let mut report = Report::new(Scenario::Lists);
        let key = self.keys.ids();
        self.reset(vec![key.clone()]).await?;

        let ids = self.dataset.ids();
        self.write(Command::RPush(key.clone(), ids.clone()), &mut report).await?;

        let stored = self.store.lrange_all(&key).await?;
        report.checked = ids.len();
        compare_sequence(&key, &ids, &stored, &mut report);

        // popping past the pushed length means something else is writing the list
        let mut popped = Vec::with_capacity(ids.len());
        while popped.len() <= ids.len() {
            match self.store.lpop(&key).await? {
                Some(id) => popped.push(id),
                None => break,
            }
        }
        compare_sequence(&format!("lpop {}", key), &ids, &popped, &mut report);
        report.note(format!("drained {} id(s) with LPOP", popped.len()));

        Ok(report)
    }

    #[instrument(skip(self))]
    async fn hashes(&mut self) -> Result<Report, ServiceError> {
        let mut report = Report::new(Scenario::Hashes);
        let dataset = Arc::clone(&self.dataset);
        let keys: Vec<String> = dataset.records.iter().map(|r| self.keys.hash(&r.id)).collect();
        self.reset(keys.clone()).await?;

        for (record, key) in dataset.records.iter().zip(&keys) {
            self.write(Command::HSet(key.clone(), record.fields.clone()), &mut report)
                .await?;
        }

        self.verify_hashes(&dataset, &keys, &mut report).await?;
        Ok(report)
    }

    #[instrument(skip(self))]
    async fn sets(&mut self) -> Result<Report, ServiceError> {
        let mut report = Report::new(Scenario::Sets);
        let dataset = Arc::clone(&self.dataset);
        let column = self.set_column(&dataset);

        // value -> ids holding it
        let mut index: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut skipped = 0;
        for (id, value) in dataset.column(&column) {
            if value.is_empty() {
                skipped += 1;
                continue;
            }
            index
                .entry(value.to_owned())
                .or_default()
                .insert(id.to_owned());
        }
        if skipped > 0 {
            report.note(format!("{} record(s) with an empty `{}` skipped", skipped, column));
        }

        let values_key = self.keys.set_values(&column);
        let mut keys = vec![values_key.clone()];
        keys.extend(index.keys().map(|value| self.keys.set_members(&column, value)));
        self.reset(keys).await?;

        let values: BTreeSet<String> = index.keys().cloned().collect();
        self.write(
            Command::SAdd(values_key.clone(), values.iter().cloned().collect()),
            &mut report,
        )
        .await?;
        for (value, ids) in &index {
            let key = self.keys.set_members(&column, value);
            self.write(Command::SAdd(key, ids.iter().cloned().collect()), &mut report)
                .await?;
        }

        self.verify_set(&values_key, &values, &mut report).await?;
        for (value, ids) in &index {
            let key = self.keys.set_members(&column, value);
            self.verify_set(&key, ids, &mut report).await?;
        }

        Ok(report)
    }

    #[instrument(skip(self))]
    async fn sorted_sets(&mut self) -> Result<Report, ServiceError> {
        let mut report = Report::new(Scenario::SortedSets);
        let dataset = Arc::clone(&self.dataset);

        let column = match self.score_column(&dataset) {
            Some(column) => column,
            None => {
                report.note("no numeric column to score by, nothing written");
                return Ok(report);
            }
        };

        let key = self.keys.zset(&column);
        self.reset(vec![key.clone()]).await?;

        let mut members = Vec::new();
        let mut skipped = 0;
        for (id, value) in dataset.column(&column) {
            match parse_score(value) {
                Some(score) => members.push((score, id.to_owned())),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            report.note(format!("{} record(s) with a non-numeric `{}` skipped", skipped, column));
        }

        self.write(Command::ZAdd(key.clone(), members.clone()), &mut report).await?;

        let mut expected: Vec<(String, f64)> =
            members.into_iter().map(|(score, id)| (id, score)).collect();
        expected.sort_by(by_score);

        let stored = self.store.zrange_withscores(&key).await?;
        report.checked = expected.len();

        for (idx, (want, got)) in expected.iter().zip(&stored).enumerate() {
            if want.0 != got.0 || !same_score(want.1, got.1) {
                report.mismatch(
                    format!("{}[{}]", key, idx),
                    format!("{} ({})", want.0, want.1),
                    format!("{} ({})", got.0, got.1),
                );
            }
        }
        if stored.len() != expected.len() {
            report.mismatch(
                format!("{} (length)", key),
                expected.len().to_string(),
                stored.len().to_string(),
            );
        }

        let descending: Vec<String> = self
            .store
            .zrevrange_withscores(&key)
            .await?
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        let want: Vec<String> = expected.iter().rev().map(|(id, _)| id.clone()).collect();
        compare_sequence(&format!("zrevrange {}", key), &want, &descending, &mut report);

        if let (Some(low), Some(high)) = (expected.first(), expected.last()) {
            report.note(format!(
                "lowest {} ({}), highest {} ({})",
                low.0, low.1, high.0, high.1
            ));
        }

        Ok(report)
    }

    #[instrument(skip(self))]
    async fn pipeline(&mut self) -> Result<Report, ServiceError> {
        let mut report = Report::new(Scenario::Pipeline);
        let dataset = Arc::clone(&self.dataset);
        let keys: Vec<String> = dataset
            .records
            .iter()
            .map(|r| self.keys.pipeline(&r.id))
            .collect();
        self.reset(keys.clone()).await?;

        let cmds: Vec<Command> = dataset
            .records
            .iter()
            .zip(&keys)
            .map(|(record, key)| Command::HSet(key.clone(), record.fields.clone()))
            .collect();

        let mut batches = 0;
        for chunk in cmds.chunks(self.opts.pipeline_batch) {
            for cmd in chunk {
                self.track(cmd);
            }
            self.store.apply_pipelined(chunk).await?;
            report.written += chunk.iter().filter(|c| !c.is_noop()).count();
            batches += 1;
        }
        report.note(format!(
            "{} command(s) in {} pipeline batch(es) of up to {}",
            report.written, batches, self.opts.pipeline_batch
        ));

        self.verify_hashes(&dataset, &keys, &mut report).await?;
        Ok(report)
    }

    #[instrument(skip(self))]
    async fn pubsub(&mut self) -> Result<Report, ServiceError> {
        let mut report = Report::new(Scenario::Pubsub);
        let channel = self.opts.channel.clone();

        let count = match self.opts.publish_count {
            Some(n) if n > self.dataset.len() => {
                report.note(format!("only {} record(s) available to publish", self.dataset.len()));
                self.dataset.len()
            }
            Some(n) => n,
            None => self.dataset.len(),
        };
        let messages = self
            .dataset
            .records
            .iter()
            .take(count)
            .map(serializer::encode)
            .collect::<Result<Vec<_>, _>>()?;

        let stream = self.pubsub.subscribe(&channel).await?;
        let mut collector = Collector(tokio::spawn(pubsub::collect(
            stream,
            messages.len(),
            self.opts.subscribe_timeout,
        )));

        let mut unheard = 0;
        for message in &messages {
            let receivers = self.pubsub.publish(&channel, message).await?;
            report.written += 1;
            if receivers == 0 {
                unheard += 1;
            }
        }
        if unheard > 0 {
            warn!(channel = %channel, unheard, "published without subscribers");
            report.note(format!("{} message(s) had no subscriber", unheard));
        }

        let received = (&mut collector.0)
            .await
            .map_err(|err| ServiceError::Collector(err.to_string()))?;
        report.checked = messages.len();

        for (idx, message) in messages.iter().enumerate() {
            let key = format!("{}#{}", channel, idx);
            match received.get(idx) {
                Some(got) if got == message => {}
                Some(got) => report.mismatch(key, message, got),
                None => report.mismatch(key, message, "<not received>"),
            }
        }

        Ok(report)
    }

    /// The configured score column, else the first numeric one.
    fn score_column(&self, dataset: &Dataset) -> Option<String> {
        self.opts
            .score_column
            .clone()
            .or_else(|| dataset.numeric_column().map(str::to_owned))
    }

    fn set_column(&self, dataset: &Dataset) -> String {
        self.opts
            .set_column
            .clone()
            .or_else(|| dataset.headers.get(1).cloned())
            .unwrap_or_else(|| dataset.id_column().to_owned())
    }

    async fn verify_hashes(
        &mut self,
        dataset: &Dataset,
        keys: &[String],
        report: &mut Report,
    ) -> Result<(), ServiceError> {
        for (record, key) in dataset.records.iter().zip(keys) {
            report.checked += 1;
            let stored: BTreeMap<String, String> =
                self.store.hgetall(key).await?.into_iter().collect();
            if stored.is_empty() {
                report.mismatch(
                    key,
                    format!("hash with {} field(s)", record.fields.len()),
                    MISSING,
                );
            } else {
                compare_fields(key, &record.as_map(), &stored, report);
            }
        }
        Ok(())
    }

    async fn verify_set(
        &mut self,
        key: &str,
        expected: &BTreeSet<String>,
        report: &mut Report,
    ) -> Result<(), ServiceError> {
        report.checked += 1;
        let stored: BTreeSet<String> = self.store.smembers(key).await?.into_iter().collect();

        for member in expected.difference(&stored) {
            report.mismatch(key, format!("{:?}", member), MISSING);
        }
        for member in stored.difference(expected) {
            report.mismatch(key, ABSENT, format!("{:?}", member));
        }
        Ok(())
    }
}

fn compare_fields(
    key: &str,
    expected: &BTreeMap<String, String>,
    stored: &BTreeMap<String, String>,
    report: &mut Report,
) {
    for (field, want) in expected {
        match stored.get(field) {
            Some(got) if got == want => {}
            Some(got) => report.mismatch(
                format!("{}.{}", key, field),
                format!("{:?}", want),
                format!("{:?}", got),
            ),
            None => report.mismatch(format!("{}.{}", key, field), format!("{:?}", want), MISSING),
        }
    }
    for (field, got) in stored {
        if !expected.contains_key(field) {
            report.mismatch(format!("{}.{}", key, field), ABSENT, format!("{:?}", got));
        }
    }
}

/// Subscriber task that is aborted when the scenario is dropped before it joins.
struct Collector(JoinHandle<Vec<String>>);

impl Drop for Collector {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Reports the first position where `stored` departs from `expected`, and any length difference.
fn compare_sequence(label: &str, expected: &[String], stored: &[String], report: &mut Report) {
    if let Some(idx) = expected.iter().zip(stored).position(|(want, got)| want != got) {
        report.mismatch(
            format!("{}[{}]", label, idx),
            format!("{:?}", expected[idx]),
            format!("{:?}", stored[idx]),
        );
    }
    if stored.len() != expected.len() {
        report.mismatch(
            format!("{} (length)", label),
            expected.len().to_string(),
            stored.len().to_string(),
        );
    }
}

/// Rounds a score to a counter start that survives the increment without overflow.
fn to_counter(score: f64, increment: i64) -> Option<i64> {
    let rounded = score.round();
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
    if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return None;
    }
    let start = rounded as i64;
    start.checked_add(increment).map(|_| start)
}

fn same_score(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}
