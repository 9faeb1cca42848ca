use crate::{
    lattice::{last_writer_wins::Timestamp, LastWriterWinsLattice},
    messages::{
        key_data::{KeyAccessData, KeyCount, KeySize, KeySizeData},
        request::{PutTuple, RequestData},
        stats::ServerThreadStatistics,
        Request, Tier,
    },
    metadata::{MetadataKey, ThreadMetadataKind},
    topics::StorageThread,
    Key, LatticeType,
};
use eyre::Context;
use std::{
    collections::{BTreeSet, HashMap},
    time::{Duration, Instant},
};

// accesses older than this are dropped from the per-key statistics
const KEY_MONITORING_THRESHOLD: Duration = Duration::from_secs(60);

/// Collects per-thread statistics between report epochs.
///
/// Once per [`REPORT_PERIOD`][super::REPORT_PERIOD] the collected statistics
/// are written into the metadata key space (as LWW values under the thread's
/// `stats`, `access`, and `size` metadata keys) and reset.
#[derive(Debug)]
pub struct ReportData {
    /// Keeps track of the start time of the current report period.
    report_start: Instant,
    /// Total time the thread spent handling messages during this epoch.
    working_time: Duration,
    /// Working time per message kind; the handlers hardcode an index into
    /// this array.
    working_time_map: [Duration; 10],
    /// Increased whenever a key was accessed.
    access_count: usize,
    /// Per-key access timestamps.
    key_access_tracker: HashMap<Key, BTreeSet<Instant>>,
    /// Increased by one after each report.
    epoch: usize,
}

impl ReportData {
    pub fn new() -> ReportData {
        Self {
            report_start: Instant::now(),
            working_time: Default::default(),
            working_time_map: Default::default(),
            access_count: 0,
            key_access_tracker: Default::default(),
            epoch: 0,
        }
    }

    pub fn report_start(&self) -> Instant {
        self.report_start
    }

    #[cfg(test)]
    pub fn access_count(&self) -> usize {
        self.access_count
    }

    #[cfg(test)]
    pub fn key_access_count(&self, key: &Key) -> usize {
        self.key_access_tracker
            .get(key)
            .map(|s| s.len())
            .unwrap_or_default()
    }

    pub fn record_working_time(&mut self, time_elapsed: Duration, index: usize) {
        self.working_time += time_elapsed;
        self.working_time_map[index] += time_elapsed;
    }

    pub fn record_key_access(&mut self, key: &Key, access_time: Instant) {
        self.key_access_tracker
            .entry(key.clone())
            .or_default()
            .insert(access_time);

        self.access_count += 1;
    }

    /// Starts the next reporting epoch and returns the report messages that
    /// should be sent out.
    pub fn next_epoch(
        &mut self,
        duration: Duration,
        node_tier: Tier,
        wt: &StorageThread,
        primary_key_sizes: Vec<KeySize>,
    ) -> eyre::Result<Vec<ReportMessage>> {
        self.epoch += 1;
        let ts = Timestamp::now();

        let stat = self.create_stat_report(duration, node_tier, wt, ts, &primary_key_sizes)?;
        let access = self.create_access_report(node_tier, wt, ts)?;
        let size = self.create_size_report(node_tier, wt, ts, primary_key_sizes)?;

        self.report_start = Instant::now();
        self.access_count = 0;
        self.working_time = Default::default();
        self.working_time_map = Default::default();

        Ok(vec![stat, access, size])
    }

    fn create_stat_report(
        &mut self,
        duration: Duration,
        node_tier: Tier,
        wt: &StorageThread,
        ts: Timestamp,
        primary_key_sizes: &[KeySize],
    ) -> eyre::Result<ReportMessage> {
        let key = MetadataKey::Thread {
            tier: node_tier,
            thread: wt.clone(),
            kind: ThreadMetadataKind::Stats,
        };

        let consumption: u64 = primary_key_sizes.iter().map(|k| k.size as u64).sum();
        let occupancy = self.working_time.as_secs_f64() / duration.as_secs_f64();
        if occupancy > 0.02 {
            log::info!("Occupancy is {}.", occupancy);
        }
        for (index, time) in self.working_time_map.iter().enumerate() {
            let event_occupancy = time.as_secs_f64() / duration.as_secs_f64();
            if event_occupancy > 0.02 {
                log::info!("Event {} occupancy is {}.", index, event_occupancy);
            }
        }

        let stat = ServerThreadStatistics {
            storage_consumption: consumption / 1000, // reported in KB
            occupancy,
            epoch: self.epoch,
            access_count: self.access_count,
        };
        let serialized_stat =
            serde_json::to_vec(&stat).context("failed to serialize ServerThreadStatistics")?;
        Ok(ReportMessage {
            message: metadata_put(key.clone(), ts, serialized_stat)?,
            key,
        })
    }

    fn create_access_report(
        &mut self,
        node_tier: Tier,
        wt: &StorageThread,
        ts: Timestamp,
    ) -> eyre::Result<ReportMessage> {
        let mut access = KeyAccessData::default();
        let current_time = Instant::now();
        for (key, access_times) in &mut self.key_access_tracker {
            // garbage collect accesses that fell out of the monitoring window
            if let Some(cutoff) = current_time.checked_sub(KEY_MONITORING_THRESHOLD) {
                *access_times = access_times.split_off(&cutoff);
            }

            access.keys.push(KeyCount {
                key: key.clone(),
                access_count: access_times.len(),
            });
        }

        let key = MetadataKey::Thread {
            tier: node_tier,
            thread: wt.clone(),
            kind: ThreadMetadataKind::KeyAccess,
        };
        let serialized_access =
            serde_json::to_vec(&access).context("failed to serialize KeyAccessData")?;
        Ok(ReportMessage {
            message: metadata_put(key.clone(), ts, serialized_access)?,
            key,
        })
    }

    fn create_size_report(
        &mut self,
        node_tier: Tier,
        wt: &StorageThread,
        ts: Timestamp,
        primary_key_sizes: Vec<KeySize>,
    ) -> eyre::Result<ReportMessage> {
        let key = MetadataKey::Thread {
            tier: node_tier,
            thread: wt.clone(),
            kind: ThreadMetadataKind::KeySize,
        };
        let size_data = KeySizeData {
            key_sizes: primary_key_sizes,
        };
        let serialized_size =
            serde_json::to_vec(&size_data).context("failed to serialize KeySizeData")?;
        Ok(ReportMessage {
            message: metadata_put(key.clone(), ts, serialized_size)?,
            key,
        })
    }
}

/// Builds the PUT request that installs a serialized report under the given
/// metadata key, wrapped in a last-writer-wins lattice.
fn metadata_put(key: MetadataKey, ts: Timestamp, serialized: Vec<u8>) -> eyre::Result<Request> {
    let lattice = LastWriterWinsLattice::from_pair(ts, serialized);
    let payload = serde_json::to_vec(&lattice).context("failed to serialize report payload")?;
    Ok(Request {
        request: RequestData::Put {
            tuples: vec![PutTuple {
                key: key.into(),
                lattice_type: LatticeType::Lww,
                payload,
            }],
        },
        response_address: Default::default(),
        request_id: Default::default(),
        address_cache_size: Default::default(),
    })
}

/// A report message that should be sent out.
pub struct ReportMessage {
    /// The message should be sent to a thread that is responsible for this
    /// metadata key.
    pub key: MetadataKey,
    /// The message that should be sent.
    pub message: Request,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_epoch_resets_counters() {
        let mut report = ReportData::new();
        let key: Key = crate::ClientKey::from("key").into();
        report.record_key_access(&key, Instant::now());
        report.record_working_time(Duration::from_millis(5), 3);
        assert_eq!(report.access_count(), 1);

        let wt = StorageThread::new("node_a".to_owned(), 0);
        let messages = report
            .next_epoch(Duration::from_secs(15), Tier::Memory, &wt, Vec::new())
            .unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(report.access_count(), 0);
        assert_eq!(report.epoch, 1);

        // access history survives across epochs, only the counters reset
        assert_eq!(report.key_access_count(&key), 1);
    }

    #[test]
    fn reports_target_the_thread_metadata_keys() {
        let mut report = ReportData::new();
        let wt = StorageThread::new("node_a".to_owned(), 2);
        let messages = report
            .next_epoch(Duration::from_secs(15), Tier::Memory, &wt, Vec::new())
            .unwrap();

        let kinds: Vec<_> = messages
            .iter()
            .map(|m| match &m.key {
                MetadataKey::Thread { kind, .. } => kind.clone(),
                other => panic!("unexpected metadata key {:?}", other),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ThreadMetadataKind::Stats,
                ThreadMetadataKind::KeyAccess,
                ThreadMetadataKind::KeySize
            ]
        );
    }
}
