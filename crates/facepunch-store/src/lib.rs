//! facepunch-store: persistence for identities, punches and reference images.
//!
//! [`AttendanceStore`] is the gateway the pipeline talks to; [`SqliteStore`]
//! is the shipped implementation. Reference captures live on disk in a
//! [`ReferenceVault`].

pub mod clock;
pub mod sqlite;
pub mod vault;

pub use clock::{Clock, ManualClock, SystemClock};
pub use sqlite::SqliteStore;
pub use vault::{ReferenceVault, VaultError};

use facepunch_core::{
    AttendanceRecord, GalleryEntry, HistoryEntry, Identity, IdentityId, Punch, PunchType,
};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("unknown identity: {0}")]
    UnknownIdentity(IdentityId),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Outcome of creating an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewIdentity {
    Created(IdentityId),
    /// Another identity already uses the name; nothing was written.
    NameTaken,
}

/// Durable store of identities and attendance punches.
pub trait AttendanceStore: Send + Sync {
    fn create_identity(&self, name: &str, reference_image_path: &Path)
        -> Result<NewIdentity, StoreError>;

    fn find_identity_by_name(&self, name: &str) -> Result<Option<Identity>, StoreError>;

    /// `(id, name)` of every identity, ordered by id.
    fn list_identities(&self) -> Result<Vec<(IdentityId, String)>, StoreError>;

    /// Every identity with its reference image, ordered by id.
    fn gallery(&self) -> Result<Vec<GalleryEntry>, StoreError>;

    /// Append a punch unconditionally. Confidence is clamped to [0, 1].
    fn record_punch(
        &self,
        identity_id: IdentityId,
        punch_type: PunchType,
        confidence: f32,
    ) -> Result<AttendanceRecord, StoreError>;

    /// The identity's punches for the current local day, most recent first.
    fn todays_punches(&self, identity_id: IdentityId) -> Result<Vec<Punch>, StoreError>;

    /// Derive the next punch type from today's punches and record it.
    ///
    /// Implementations must make the read and the write atomic per identity,
    /// so concurrent calls cannot both observe the same most-recent punch.
    fn punch(&self, identity_id: IdentityId, confidence: f32) -> Result<AttendanceRecord, StoreError>;

    /// Punches recorded within the last `days` days, most recent first.
    fn history(&self, days: u32) -> Result<Vec<HistoryEntry>, StoreError>;
}
