//! Periodic statistics reported by each storage thread.

/// A message to capture the periodic reporting of each storage thread's local
/// statistics.
///
/// Written into the metadata key space under the thread's
/// [`Stats`][crate::metadata::ThreadMetadataKind::Stats] key once per report
/// epoch.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServerThreadStatistics {
    /// The storage consumption of the thread, in KB.
    pub storage_consumption: u64,
    /// The fraction of the epoch that the thread spent handling messages.
    pub occupancy: f64,
    /// The thread's reporting epoch.
    pub epoch: usize,
    /// How many key accesses were serviced during this epoch.
    pub access_count: usize,
}
