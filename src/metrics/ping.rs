use crate::core;

/// A ping type: a named envelope of metrics and events with its own
/// submission schedule.
///
/// Creating a ping type registers it, so it can be submitted by name and
/// found by the eager events-capacity submission.
#[derive(Clone, Debug)]
pub struct PingType {
    pub(crate) name: String,
    pub(crate) include_client_id: bool,
    pub(crate) send_if_empty: bool,
    pub(crate) reason_codes: Vec<String>,
}

impl PingType {
    /// Creates and registers a new ping type.
    pub fn new(
        name: impl Into<String>,
        include_client_id: bool,
        send_if_empty: bool,
        reason_codes: Vec<String>,
    ) -> Self {
        let ping = Self {
            name: name.into(),
            include_client_id,
            send_if_empty,
            reason_codes,
        };
        let ping_clone = ping.clone();
        core::launch_with_glean_mut(move |glean| glean.register_ping_type(&ping_clone));
        ping
    }

    pub(crate) fn unregistered(
        name: impl Into<String>,
        include_client_id: bool,
        send_if_empty: bool,
        reason_codes: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            include_client_id,
            send_if_empty,
            reason_codes,
        }
    }

    /// The ping's name, the second-to-last segment of its submission path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this ping's reasons include `reason`.
    pub(crate) fn accepts_reason(&self, reason: &str) -> bool {
        self.reason_codes.iter().any(|code| code == reason)
    }

    /// Submits this ping, assembling an envelope from the current metric
    /// and event stores.
    ///
    /// A submission collecting neither metrics nor events is dropped
    /// unless the ping was created with `send_if_empty`. A reason not
    /// listed in the ping's reason codes is dropped from the envelope.
    pub fn submit(&self, reason: Option<&str>) {
        let ping = self.clone();
        let reason = reason.map(str::to_string);
        core::launch_with_glean(move |glean| {
            glean.submit_ping(&ping, reason.as_deref());
        });
    }
}
