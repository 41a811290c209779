//! Advisory, time-limited work claims ("WIP markers") on the remote store.
//!
//! A claim is a small JSON object stored next to the output it announces,
//! at `<target-key><suffix>`. Claims are best effort: two workers may still
//! process the same unit when the store has no create-only writes, which wastes
//! work but never corrupts outputs, since publishing refuses to overwrite.

use std::{net::UdpSocket, sync::Arc};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use stampsync_common::error::Error;
use stampsync_objectstore::{ObjectStore, ObjectUri, PutMode};

pub const DEFAULT_CLAIM_SUFFIX: &str = ".wip";

/// Body of a claim marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub files: Vec<String>,
}

impl ClaimRecord {
    pub fn new(owner: &ClaimOwner, start_time: DateTime<Utc>, files: Vec<String>) -> ClaimRecord {
        ClaimRecord {
            hostname: owner.hostname.clone(),
            ip_address: owner.ip_address.clone(),
            username: owner.username.clone(),
            start_time: start_time.to_rfc3339(),
            pid: owner.pid,
            files,
        }
    }

    /// Parses `start_time`. Markers written without an offset are read as UTC.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        if let Ok(time) = DateTime::parse_from_rfc3339(&self.start_time) {
            return Some(time.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&self.start_time, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Identity of the current worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOwner {
    pub hostname: String,
    pub ip_address: String,
    pub username: String,
    pub pid: u32,
}

impl ClaimOwner {
    pub fn detect() -> ClaimOwner {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        ClaimOwner {
            hostname,
            ip_address: outbound_ip().unwrap_or_else(|| "127.0.0.1".to_string()),
            username: whoami::username(),
            pid: std::process::id(),
        }
    }
}

/// Address of the interface used for outbound traffic. Connecting a UDP
/// socket sends no packets.
fn outbound_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

/// A claim marker found on the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveClaim {
    pub uri: ObjectUri,
    /// `None` when the marker body could not be read or parsed.
    pub record: Option<ClaimRecord>,
    /// The store's modification time of the marker.
    pub last_modified: Option<DateTime<Utc>>,
}

impl ActiveClaim {
    /// Age of the claim: measured from the store's timestamp of the marker,
    /// falling back to the recorded start time. Negative ages (clock skew)
    /// are clamped to zero.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        let since = self
            .last_modified
            .or_else(|| self.record.as_ref().and_then(ClaimRecord::started_at))?;
        Some((now - since).max(Duration::zero()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The target output already exists; nothing to do.
    AlreadyDone,
    /// A new marker was written for this worker.
    Claimed,
    /// Another worker holds a fresh claim.
    AlreadyClaimed { claim: ActiveClaim, age: Duration },
    /// A stale claim was replaced by this worker's.
    Reclaimed { previous: ActiveClaim },
    /// The marker could not be checked or written; proceed without a claim.
    Unclaimed { reason: String },
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct WorkClaimManager {
    store: Arc<dyn ObjectStore>,
    suffix: String,
    owner: ClaimOwner,
    clock: Clock,
}

impl WorkClaimManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> WorkClaimManager {
        WorkClaimManager {
            store,
            suffix: DEFAULT_CLAIM_SUFFIX.to_string(),
            owner: ClaimOwner::detect(),
            clock: Box::new(Utc::now),
        }
    }

    pub fn with_suffix(
        mut self,
        suffix: impl Into<String>,
    ) -> stampsync_common::Result<WorkClaimManager> {
        let suffix = suffix.into();
        stampsync_common::verify_config!(!suffix.is_empty(), "claim suffix must not be empty");
        self.suffix = suffix;
        Ok(self)
    }

    pub fn with_owner(mut self, owner: ClaimOwner) -> WorkClaimManager {
        self.owner = owner;
        self
    }

    pub fn with_clock(
        mut self,
        clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static,
    ) -> WorkClaimManager {
        self.clock = Box::new(clock);
        self
    }

    pub fn owner(&self) -> &ClaimOwner {
        &self.owner
    }

    pub fn marker_uri(&self, target: &ObjectUri) -> stampsync_common::Result<ObjectUri> {
        target.with_suffix(&self.suffix)
    }

    pub fn try_claim(&self, target: &ObjectUri, max_age: Duration) -> ClaimOutcome {
        self.try_claim_with_files(target, max_age, vec![target.to_string()])
    }

    /// Like [`WorkClaimManager::try_claim`], recording `files` in the marker.
    pub fn try_claim_with_files(
        &self,
        target: &ObjectUri,
        max_age: Duration,
        files: Vec<String>,
    ) -> ClaimOutcome {
        match self.store.exists(target) {
            Ok(true) => {
                log::info!("output exists, no claim needed: {target}");
                return ClaimOutcome::AlreadyDone;
            }
            Ok(false) => {}
            Err(e) => return self.unclaimed(Error::claim_unavailable(target.to_string(), e)),
        }

        let marker = match self.marker_uri(target) {
            Ok(marker) => marker,
            Err(e) => return self.unclaimed(e),
        };
        let existing = match self.inspect_marker(&marker) {
            Ok(existing) => existing,
            Err(e) => return self.unclaimed(e),
        };

        let now = (self.clock)();
        let record = ClaimRecord::new(&self.owner, now, files);
        match existing {
            None => {
                let mode = if self.store.supports_conditional_put() {
                    PutMode::Create
                } else {
                    PutMode::Overwrite
                };
                match self.write_marker(&marker, &record, mode) {
                    Ok(()) => {
                        log::info!(
                            "claimed {target} (host: {}, ip: {}, user: {})",
                            self.owner.hostname,
                            self.owner.ip_address,
                            self.owner.username
                        );
                        ClaimOutcome::Claimed
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        self.lost_race(&marker, now)
                    }
                    Err(e) => self.unclaimed(Error::claim_unavailable(marker.to_string(), e)),
                }
            }
            Some(claim) => {
                let age = claim.age(now);
                match age {
                    Some(age) if age <= max_age => {
                        self.log_held(&claim, age);
                        ClaimOutcome::AlreadyClaimed { claim, age }
                    }
                    _ => {
                        log::info!(
                            "stale claim found ({}), reclaiming: {marker}",
                            describe_age(age)
                        );
                        match self.write_marker(&marker, &record, PutMode::Overwrite) {
                            Ok(()) => ClaimOutcome::Reclaimed { previous: claim },
                            Err(e) => {
                                self.unclaimed(Error::claim_unavailable(marker.to_string(), e))
                            }
                        }
                    }
                }
            }
        }
    }

    /// Removes the claim marker of `target`. Returns `true` if a marker was removed.
    pub fn release(&self, target: &ObjectUri) -> bool {
        let marker = match self.marker_uri(target) {
            Ok(marker) => marker,
            Err(e) => {
                log::warn!("cannot release claim of {target}: {e}");
                return false;
            }
        };
        match self.store.head(&marker) {
            Ok(None) => {
                log::debug!("no claim to release: {marker}");
                false
            }
            Ok(Some(_)) => match self.store.delete(&marker) {
                Ok(()) => {
                    log::info!("released claim {marker}");
                    true
                }
                Err(e) => {
                    log::warn!("failed to remove claim {marker}: {e}");
                    false
                }
            },
            Err(e) => {
                log::warn!("failed to check claim {marker}: {e}");
                false
            }
        }
    }

    /// The claim currently held on `target`, if any.
    pub fn inspect(&self, target: &ObjectUri) -> stampsync_common::Result<Option<ActiveClaim>> {
        let marker = self.marker_uri(target)?;
        self.inspect_marker(&marker)
    }

    fn inspect_marker(&self, marker: &ObjectUri) -> stampsync_common::Result<Option<ActiveClaim>> {
        let info = self
            .store
            .head(marker)
            .map_err(|e| Error::claim_unavailable(marker.to_string(), e))?;
        let Some(info) = info else {
            return Ok(None);
        };
        // An unreadable body still leaves the store timestamp for the age check.
        let record = match self.store.get(marker) {
            Ok(body) => match serde_json::from_slice::<ClaimRecord>(&body) {
                Ok(record) => Some(record),
                Err(e) => {
                    log::warn!("unparsable claim marker {marker}: {e}");
                    None
                }
            },
            Err(e) => {
                log::warn!("unreadable claim marker {marker}: {e}");
                None
            }
        };
        Ok(Some(ActiveClaim {
            uri: marker.clone(),
            record,
            last_modified: info.last_modified,
        }))
    }

    fn write_marker(
        &self,
        marker: &ObjectUri,
        record: &ClaimRecord,
        mode: PutMode,
    ) -> std::io::Result<()> {
        let body = serde_json::to_vec_pretty(record)?;
        self.store.put(marker, &body, mode)
    }

    fn lost_race(&self, marker: &ObjectUri, now: DateTime<Utc>) -> ClaimOutcome {
        match self.inspect_marker(marker) {
            Ok(Some(claim)) => {
                let age = claim.age(now).unwrap_or_else(Duration::zero);
                self.log_held(&claim, age);
                ClaimOutcome::AlreadyClaimed { claim, age }
            }
            Ok(None) => self.unclaimed(Error::invalid_operation(format!(
                "claim marker {marker} vanished after a conflicting write"
            ))),
            Err(e) => self.unclaimed(e),
        }
    }

    fn log_held(&self, claim: &ActiveClaim, age: Duration) {
        match &claim.record {
            Some(record) => log::info!(
                "claim in progress ({}): {} by user {} on host {} ({})",
                describe_age(Some(age)),
                claim.uri,
                record.username,
                record.hostname,
                record.ip_address
            ),
            None => log::info!("claim in progress ({}): {}", describe_age(Some(age)), claim.uri),
        }
    }

    fn unclaimed(&self, error: Error) -> ClaimOutcome {
        log::warn!("proceeding without a claim: {error}");
        ClaimOutcome::Unclaimed {
            reason: error.to_string(),
        }
    }
}

fn describe_age(age: Option<Duration>) -> String {
    match age {
        Some(age) => format!("{:.1} hours old", age.num_seconds() as f64 / 3600.0),
        None => "age unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_record_reads_existing_markers() {
        let body = r#"{
  "hostname": "worker-7",
  "ip_address": "10.0.0.7",
  "username": "impresso",
  "start_time": "2025-02-03T10:20:30.123456",
  "pid": 4242,
  "files": ["out.jsonl.bz2", "s3://b/out.jsonl.bz2"]
}"#;
        let record: ClaimRecord = serde_json::from_str(body).unwrap();
        assert_eq!(record.pid, 4242);
        assert_eq!(
            record.started_at().unwrap(),
            Utc.with_ymd_and_hms(2025, 2, 3, 10, 20, 30).unwrap()
                + Duration::microseconds(123456)
        );

        let partial: ClaimRecord = serde_json::from_str(r#"{"hostname": "h"}"#).unwrap();
        assert_eq!(partial.started_at(), None);
    }

    #[test]
    fn test_age_prefers_store_timestamp() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let owner = ClaimOwner {
            hostname: "h".into(),
            ip_address: "127.0.0.1".into(),
            username: "u".into(),
            pid: 1,
        };
        let record = ClaimRecord::new(&owner, now - Duration::hours(30), vec![]);
        let mut claim = ActiveClaim {
            uri: ObjectUri::parse("s3://b/out.wip").unwrap(),
            record: Some(record),
            last_modified: Some(now - Duration::hours(2)),
        };
        assert_eq!(claim.age(now), Some(Duration::hours(2)));

        claim.last_modified = None;
        assert_eq!(claim.age(now), Some(Duration::hours(30)));

        claim.last_modified = Some(now + Duration::minutes(5));
        assert_eq!(claim.age(now), Some(Duration::zero()));

        claim.last_modified = None;
        claim.record = None;
        assert_eq!(claim.age(now), None);
    }

    #[test]
    fn test_detect_owner() {
        let owner = ClaimOwner::detect();
        assert_eq!(owner.pid, std::process::id());
        assert!(!owner.ip_address.is_empty());
    }
}
