//! Reserved job topics of a single thing and the routing table for them.

/// Every response or event stream the agent subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GetPendingAccepted,
    GetPendingRejected,
    NextJobChanged,
    StartNextAccepted,
    StartNextRejected,
    UpdateAccepted,
    UpdateRejected,
}

impl EventKind {
    /// Responses to the initial pending-jobs listing.
    pub const LISTING: [EventKind; 2] = [EventKind::GetPendingAccepted, EventKind::GetPendingRejected];

    /// Streams needed before the first start-next request may be published.
    pub const STEADY_STATE: [EventKind; 5] = [
        EventKind::NextJobChanged,
        EventKind::StartNextAccepted,
        EventKind::StartNextRejected,
        EventKind::UpdateAccepted,
        EventKind::UpdateRejected,
    ];
}

/// Topic routed to its event kind; update responses also carry the job id
/// taken from the topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub kind: EventKind,
    pub job_id: Option<String>,
}

const UPDATE_WILDCARD: &str = "+";

#[derive(Debug, Clone)]
pub struct JobTopics {
    prefix: String,
}

impl JobTopics {
    pub fn new(thing_name: &str) -> Self {
        Self {
            prefix: format!("$aws/things/{thing_name}/jobs"),
        }
    }

    pub fn get_pending(&self) -> String {
        format!("{}/get", self.prefix)
    }

    pub fn start_next(&self) -> String {
        format!("{}/start-next", self.prefix)
    }

    pub fn update(&self, job_id: &str) -> String {
        format!("{}/{job_id}/update", self.prefix)
    }

    /// Topic filter to subscribe to for `kind`.
    pub fn subscription(&self, kind: EventKind) -> String {
        match kind {
            EventKind::GetPendingAccepted => format!("{}/accepted", self.get_pending()),
            EventKind::GetPendingRejected => format!("{}/rejected", self.get_pending()),
            EventKind::NextJobChanged => format!("{}/notify-next", self.prefix),
            EventKind::StartNextAccepted => format!("{}/accepted", self.start_next()),
            EventKind::StartNextRejected => format!("{}/rejected", self.start_next()),
            EventKind::UpdateAccepted => format!("{}/accepted", self.update(UPDATE_WILDCARD)),
            EventKind::UpdateRejected => format!("{}/rejected", self.update(UPDATE_WILDCARD)),
        }
    }

    /// Map an incoming topic to the stream it belongs to.
    pub fn route(&self, topic: &str) -> Option<Route> {
        let rest = topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let fixed = match rest {
            "get/accepted" => Some(EventKind::GetPendingAccepted),
            "get/rejected" => Some(EventKind::GetPendingRejected),
            "notify-next" => Some(EventKind::NextJobChanged),
            "start-next/accepted" => Some(EventKind::StartNextAccepted),
            "start-next/rejected" => Some(EventKind::StartNextRejected),
            _ => None,
        };
        if let Some(kind) = fixed {
            return Some(Route { kind, job_id: None });
        }

        let mut parts = rest.split('/');
        let (Some(job_id), Some("update"), Some(outcome), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        let kind = match outcome {
            "accepted" => EventKind::UpdateAccepted,
            "rejected" => EventKind::UpdateRejected,
            _ => return None,
        };
        if job_id.is_empty() || job_id == UPDATE_WILDCARD {
            return None;
        }
        Some(Route {
            kind,
            job_id: Some(job_id.to_string()),
        })
    }
}
