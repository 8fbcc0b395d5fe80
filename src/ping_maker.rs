//! The ping assembler.
//!
//! Snapshots the metric and event stores for one ping into the canonical
//! envelope, annotates it with client, sequence and timing information,
//! and produces the [`PingRequest`] handed to the pings database.

use std::time::SystemTime;

use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

use crate::common::{CommonMetricData, Lifetime};
use crate::constants::{INTERNAL_STORAGE, SCHEMA_VERSION, SDK_VERSION, TELEMETRY_AGENT};
use crate::core::Glean;
use crate::metrics::{Metric, PingType, TimeUnit};
use crate::upload::PingRequest;
use crate::utils::{get_iso_time_string, local_now_with_offset};

pub struct PingMaker;

impl PingMaker {
    pub fn new() -> Self {
        Self
    }

    fn bookkeeping_meta(&self, storage_name: &str, suffix: &str) -> CommonMetricData {
        CommonMetricData {
            name: format!("{storage_name}#{suffix}"),
            category: "glean.internal.metrics".into(),
            send_in_pings: vec![INTERNAL_STORAGE.into()],
            lifetime: Lifetime::User,
            disabled: false,
            dynamic_label: None,
        }
    }

    /// Loads, increments and persists the sequence number for
    /// `storage_name`. The pre-increment value is returned, so the first
    /// submission reports 0.
    fn get_ping_seq(&self, glean: &Glean, storage_name: &str) -> i32 {
        let meta = self.bookkeeping_meta(storage_name, "sequence");
        let mut current = 0;
        glean
            .metrics_db()
            .transform(glean, &meta, "counter", &mut |old| {
                current = match old {
                    Some(Metric::Counter(count)) => count,
                    _ => 0,
                };
                Metric::Counter(current.saturating_add(1))
            });
        current
    }

    /// The window this submission covers: the previously persisted start
    /// (or the process start on a first submission) up to now. Now is
    /// persisted as the next start, rendered at minute precision.
    fn get_start_end_times(&self, glean: &Glean, storage_name: &str) -> (String, String) {
        let meta = self.bookkeeping_meta(storage_name, "start");
        let end = local_now_with_offset();

        let start = match glean.metrics_db().get_metric(
            Lifetime::User,
            INTERNAL_STORAGE,
            "datetime",
            &meta.base_identifier(),
        ) {
            Some(Metric::Datetime(start, _)) => start,
            _ => glean.start_time(),
        };

        glean
            .metrics_db()
            .record(glean, &meta, &Metric::Datetime(end, TimeUnit::Minute));

        (
            get_iso_time_string(start, TimeUnit::Minute),
            get_iso_time_string(end, TimeUnit::Minute),
        )
    }

    fn get_ping_info(&self, glean: &Glean, storage_name: &str, reason: Option<&str>) -> JsonValue {
        let seq = self.get_ping_seq(glean, storage_name);
        let (start_time, end_time) = self.get_start_end_times(glean, storage_name);
        let mut ping_info = json!({
            "seq": seq,
            "start_time": start_time,
            "end_time": end_time,
        });
        if let Some(reason) = reason {
            ping_info["reason"] = json!(reason);
        }
        ping_info
    }

    /// Flattens the stored client-info metrics into the `client_info`
    /// section and injects the SDK build.
    fn get_client_info(&self, glean: &Glean, include_client_id: bool) -> JsonValue {
        let mut client_info = Map::new();
        client_info.insert("telemetry_sdk_build".into(), json!(SDK_VERSION));

        if let Some(JsonValue::Object(sections)) = glean
            .metrics_db()
            .get_ping_metrics(crate::constants::CLIENT_INFO_STORAGE, false)
        {
            for (_kind, ids) in sections {
                if let JsonValue::Object(ids) = ids {
                    for (identifier, payload) in ids {
                        client_info.insert(identifier, payload);
                    }
                }
            }
        }

        if !include_client_id {
            client_info.remove("client_id");
        }

        JsonValue::Object(client_info)
    }

    fn build_headers(&self, glean: &Glean) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (
                "Date".to_string(),
                httpdate::fmt_http_date(SystemTime::now()),
            ),
            (
                "X-Telemetry-Agent".to_string(),
                format!("{}/{}", TELEMETRY_AGENT, glean.platform_info().name()),
            ),
        ];
        if let Some(tag) = &glean.debug().debug_view_tag {
            headers.push(("X-Debug-ID".to_string(), tag.clone()));
        }
        if let Some(tags) = &glean.debug().source_tags {
            headers.push(("X-Source-Tags".to_string(), tags.join(",")));
        }
        headers
    }

    /// Assembles the envelope for one submission of `ping`.
    ///
    /// Collection clears the ping-lifetime data and the event list of the
    /// ping in the same pass. Returns `None` for a submission that would
    /// carry neither metrics nor events, unless the ping sends anyway.
    pub fn collect(
        &self,
        glean: &Glean,
        ping: &PingType,
        reason: Option<&str>,
    ) -> Option<PingRequest> {
        let metrics = glean.metrics_db().get_ping_metrics(&ping.name, true);
        let events = glean.events_db().snapshot(&ping.name, true);

        if metrics.is_none() && events.is_none() && !ping.send_if_empty {
            log::info!("Ping {} has no content, dropping the submission", ping.name);
            return None;
        }

        let mut payload = json!({
            "ping_info": self.get_ping_info(glean, &ping.name, reason),
            "client_info": self.get_client_info(glean, ping.include_client_id),
        });
        if let Some(metrics) = metrics {
            payload["metrics"] = metrics;
        }
        if let Some(events) = events {
            payload["events"] = serde_json::to_value(events).unwrap_or(JsonValue::Null);
        }

        let document_id = Uuid::new_v4().to_string();
        let path = format!(
            "/submit/{}/{}/{}/{}",
            glean.application_id(),
            ping.name,
            SCHEMA_VERSION,
            document_id
        );
        let headers = self.build_headers(glean);

        Some(PingRequest::new(
            document_id,
            ping.name.clone(),
            path,
            payload,
            headers,
        ))
    }
}

impl Default for PingMaker {
    fn default() -> Self {
        Self::new()
    }
}
