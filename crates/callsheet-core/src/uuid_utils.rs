//! Time-ordered document ids.
//!
//! Every document the clone engine writes gets a UUIDv7, so the creation
//! time of a clone root can be recovered from its id alone. The orphan
//! reconciler relies on this to apply its grace period.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Allocate a fresh UUIDv7.
///
/// ```
/// use callsheet_core::uuid_utils::{is_v7, new_v7};
///
/// assert!(is_v7(&new_v7()));
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

#[inline]
pub fn is_v7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}

/// Creation time embedded in a UUIDv7, millisecond precision.
///
/// Ids of any other version (store-assigned v4 ids, for instance) carry
/// no usable time and yield `None`.
pub fn extract_timestamp(id: &Uuid) -> Option<DateTime<Utc>> {
    if !is_v7(id) {
        return None;
    }
    let (secs, nanos) = id.get_timestamp()?.to_unix();
    DateTime::from_timestamp(i64::try_from(secs).ok()?, nanos)
}

/// How long ago `id` was allocated, as seen at `now`.
///
/// Falls back to `fallback` when the id holds no timestamp. Ids from the
/// future count as zero age.
pub fn id_age(id: &Uuid, fallback: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    let created = extract_timestamp(id).unwrap_or(fallback);
    now.signed_duration_since(created)
        .to_std()
        .unwrap_or_default()
}
