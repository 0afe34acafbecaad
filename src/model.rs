//! Data model shared across the rebuild coordination service: the task
//! queued by [`crate::scheduler`], the status snapshot returned to callers,
//! and the owned rank lists that travel with both.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An owned, deep-cloneable list of ranks (pool members).
///
/// The source protocol deep-copies rank lists on `schedule` so that the
/// caller's buffer can be freed immediately; `RankList` owns its storage for
/// the same reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankList(Vec<u32>);

impl RankList {
    /// Builds a rank list from any iterable of ranks.
    pub fn new(ranks: impl Into<Vec<u32>>) -> Self {
        Self(ranks.into())
    }

    /// The empty rank list.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Ranks as a slice.
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// True if `rank` appears in this list.
    pub fn contains(&self, rank: u32) -> bool {
        self.0.contains(&rank)
    }

    /// Number of ranks in this list.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if this list has no ranks.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u32>> for RankList {
    fn from(ranks: Vec<u32>) -> Self {
        Self(ranks)
    }
}

impl<'a> IntoIterator for &'a RankList {
    type Item = &'a u32;
    type IntoIter = std::slice::Iter<'a, u32>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A queued rebuild request, owned by the task queue until the driver
/// finishes processing it (success or failure).
#[derive(Debug, Clone)]
pub struct RebuildTask {
    /// Pool under rebuild.
    pub pool_id: Uuid,
    /// Pool map version at which this rebuild was requested.
    pub map_version: u32,
    /// Targets known to have failed, triggering this rebuild.
    pub failed_targets: RankList,
    /// Service ranks to notify / coordinate with.
    pub service_list: RankList,
}

impl RebuildTask {
    /// Deep-copies the given rank lists into a new owned task.
    pub fn new(
        pool_id: Uuid,
        map_version: u32,
        failed_targets: &RankList,
        service_list: &RankList,
    ) -> Self {
        Self {
            pool_id,
            map_version,
            failed_targets: failed_targets.clone(),
            service_list: service_list.clone(),
        }
    }
}

/// A snapshot of rebuild progress, returned to callers of `query`.
///
/// `version == 0` means no rebuild is in progress. `done` implies no
/// further pulls will occur for this version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RebuildStatus {
    /// Map version of this rebuild; 0 means no rebuild.
    pub version: u32,
    /// Whether the rebuild has finished (successfully or not).
    pub done: bool,
    /// Last observed error code, 0 if none.
    pub errno: i32,
    /// Number of objects pulled so far.
    pub obj_nr: u64,
    /// Number of records pulled so far.
    pub rec_nr: u64,
}

impl RebuildStatus {
    /// A status reflecting "no rebuild in progress".
    pub fn idle() -> Self {
        Self::default()
    }

    /// True if this status reflects "no rebuild in progress".
    pub fn is_idle(&self) -> bool {
        self.version == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rank_list_is_deep_copied() {
        let mut original = RankList::new(vec![1, 2, 3]);
        let task = RebuildTask::new(
            Uuid::nil(),
            7,
            &original,
            &RankList::empty(),
        );
        assert_eq!(task.failed_targets, original);
        assert!(!std::ptr::eq(
            task.failed_targets.as_slice(),
            original.as_slice()
        ));

        // Replacing the caller's buffer must not be observed through the
        // task's own copy.
        original = RankList::new(vec![9, 9, 9]);
        assert_eq!(task.failed_targets.as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn idle_status_has_zero_version() {
        let status = RebuildStatus::idle();
        assert!(status.is_idle());
        assert!(!status.done);
    }
}
