//! Identity & staleness engine.
//!
//! Decides what to do with an incoming item given the local record (if any)
//! under the same remote key. Rules, in order:
//!
//! 1. no local record → [`Decision::Create`]
//! 2. local record retired → [`Decision::Update`] (republish, timestamp ignored)
//! 3. `force` set → [`Decision::Update`]
//! 4. remote timestamp missing → [`Decision::Skip`]
//! 5. `remote_changed <= local.last_changed_remote` → [`Decision::RecordTelemetryOnly`]
//! 6. otherwise → [`Decision::Update`]

use serde::Serialize;

use crate::models::ContentReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Create,
    Update,
    RecordTelemetryOnly,
    Skip,
}

impl Decision {
    /// Whether the content reference's fields get written.
    pub fn writes_fields(self) -> bool {
        matches!(self, Decision::Create | Decision::Update)
    }

    /// Whether a telemetry record is appended.
    pub fn records_telemetry(self) -> bool {
        !matches!(self, Decision::Skip)
    }
}

pub fn decide(
    remote_changed: Option<i64>,
    local: Option<&ContentReference>,
    force: bool,
) -> Decision {
    let Some(local) = local else {
        return Decision::Create;
    };
    if !local.is_published() || force {
        return Decision::Update;
    }
    match remote_changed {
        None => Decision::Skip,
        Some(ts) if ts <= local.fields.last_changed_remote => Decision::RecordTelemetryOnly,
        Some(_) => Decision::Update,
    }
}
