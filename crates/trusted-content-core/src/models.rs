//! Core data models for the local mirror.
//!
//! A [`ContentReference`] mirrors one remote item; a [`TelemetryRecord`] is
//! an append-only syndication snapshot taken each time an item is observed.
//! The four enumerated trust fields are closed allow-lists: anything the
//! remote sends outside them is coerced to "empty" (`None`).

use std::str::FromStr;

use serde::Serialize;
use strum::{AsRefStr, EnumString};

/// Provenance role the publishing site claims for an item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrustRole {
    PrimarySource,
    SecondarySource,
    SubjectMatterContributor,
    Unverified,
}

/// Organisational reach of the publishing unit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrustScope {
    DepartmentLevel,
    CollegeLevel,
    AdministrativeUnit,
    CampusWide,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Timeliness {
    Evergreen,
    FallSemester,
    SpringSemester,
    SummerSemester,
    WinterSemester,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Audience {
    Students,
    Faculty,
    Staff,
    Alumni,
}

/// Validate a raw remote value against an allow-list.
///
/// Returns `None` (stored as the empty string) for missing, blank, or
/// unknown values. Never fails.
pub fn coerce<T: FromStr>(raw: Option<&str>) -> Option<T> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| T::from_str(s).ok())
}

/// Storage form of an optional allow-listed value: the variant name or `""`.
pub fn allow_list_str<T: AsRef<str>>(value: &Option<T>) -> &str {
    value.as_ref().map(|v| v.as_ref()).unwrap_or("")
}

/// Publication state of a mirrored record.
///
/// `Active → Retired` happens only through reconciliation at the end of a
/// complete pass; `Retired → Active` only through the republish rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceState {
    Active,
    Retired,
}

impl ReferenceState {
    pub fn from_published(published: bool) -> Self {
        if published {
            ReferenceState::Active
        } else {
            ReferenceState::Retired
        }
    }

    pub fn is_published(self) -> bool {
        self == ReferenceState::Active
    }
}

/// Every field written to a content reference in a single logical write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceFields {
    pub remote_key: String,
    pub source_identity: String,
    pub remote_item_type: String,
    pub remote_node_id: Option<i64>,
    pub title: String,
    pub summary: String,
    pub trust_role: Option<TrustRole>,
    pub trust_scope: Option<TrustScope>,
    pub timeliness: Option<Timeliness>,
    pub audience: Option<Audience>,
    /// Local taxonomy term ids, matched by name.
    pub topics: Vec<i64>,
    pub remote_path: Option<String>,
    pub remote_url: Option<String>,
    pub focal_image_wide: Option<String>,
    pub focal_image_square: Option<String>,
    pub focal_image_alt: Option<String>,
    pub last_changed_remote: i64,
    pub raw_payload: String,
    pub syndication_consumer_count: i64,
    pub syndication_total_views: i64,
    pub last_fetched: i64,
}

/// A mirrored record as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentReference {
    /// Store-assigned key, stable for the record's lifetime.
    pub local_key: i64,
    pub state: ReferenceState,
    #[serde(flatten)]
    pub fields: ReferenceFields,
}

impl ContentReference {
    pub fn is_published(&self) -> bool {
        self.state.is_published()
    }
}

/// Lightweight row used for retirement: which keys a source currently owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKey {
    pub local_key: i64,
    pub remote_key: String,
    pub state: ReferenceState,
}

/// Syndication counters reported by the remote for one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub consumer_count: i64,
    pub consumer_sites: Vec<String>,
    pub total_views: i64,
}

/// Append-only telemetry row. Never updated or deleted by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryRecord {
    pub remote_key: String,
    pub reference_key: i64,
    pub fetched_at: i64,
    pub consumer_site_count: i64,
    /// JSON array of consumer site identifiers.
    pub consumer_site_list: String,
    pub total_views: i64,
}

impl TelemetryRecord {
    pub fn from_snapshot(
        remote_key: &str,
        reference_key: i64,
        fetched_at: i64,
        snapshot: &TelemetrySnapshot,
    ) -> Self {
        Self {
            remote_key: remote_key.to_string(),
            reference_key,
            fetched_at,
            consumer_site_count: snapshot.consumer_count,
            consumer_site_list: serde_json::to_string(&snapshot.consumer_sites)
                .unwrap_or_else(|_| "[]".to_string()),
            total_views: snapshot.total_views,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_accepts_known_values() {
        assert_eq!(
            coerce::<TrustRole>(Some("primary_source")),
            Some(TrustRole::PrimarySource)
        );
        assert_eq!(
            coerce::<TrustScope>(Some(" campus_wide ")),
            Some(TrustScope::CampusWide)
        );
        assert_eq!(
            coerce::<Timeliness>(Some("winter_semester")),
            Some(Timeliness::WinterSemester)
        );
        assert_eq!(coerce::<Audience>(Some("alumni")), Some(Audience::Alumni));
    }

    #[test]
    fn coerce_drops_unknown_values() {
        assert_eq!(coerce::<TrustRole>(Some("definitely_trusted")), None);
        assert_eq!(coerce::<TrustRole>(Some("Primary Source")), None);
        assert_eq!(coerce::<TrustRole>(Some("")), None);
        assert_eq!(coerce::<TrustRole>(None), None);
    }

    #[test]
    fn allow_list_str_round_trips_to_storage_form() {
        assert_eq!(
            allow_list_str(&Some(TrustRole::SubjectMatterContributor)),
            "subject_matter_contributor"
        );
        assert_eq!(allow_list_str::<TrustRole>(&None), "");
    }

    #[test]
    fn telemetry_record_serializes_site_list() {
        let snap = TelemetrySnapshot {
            consumer_count: 2,
            consumer_sites: vec!["a.example.edu".into(), "b.example.edu".into()],
            total_views: 17,
        };
        let rec = TelemetryRecord::from_snapshot("k", 3, 1000, &snap);
        assert_eq!(rec.consumer_site_list, r#"["a.example.edu","b.example.edu"]"#);
        assert_eq!(rec.consumer_site_count, 2);
        assert_eq!(rec.reference_key, 3);
    }
}
