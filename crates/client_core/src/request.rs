use serde::{Deserialize, Serialize};

/// Token stamped on a one-shot fetch when it starts and echoed back on
/// completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

/// Latest request issued for a slice. Completions carrying any other id
/// are stale and must not touch the slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestTracker {
    latest: Option<RequestId>,
}

impl RequestTracker {
    pub fn begin(self, request: RequestId) -> Self {
        Self {
            latest: Some(self.latest.map_or(request, |latest| latest.max(request))),
        }
    }

    pub fn is_current(&self, request: RequestId) -> bool {
        self.latest == Some(request)
    }

    pub fn latest(&self) -> Option<RequestId> {
        self.latest
    }

    /// Retires every request issued so far. The next `begin` with a fresh
    /// id is current again.
    pub fn invalidate(self) -> Self {
        Self {
            latest: self.latest.map(|RequestId(id)| RequestId(id.saturating_add(1))),
        }
    }
}
