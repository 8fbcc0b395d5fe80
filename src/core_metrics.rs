//! The metrics the SDK records about itself and its host. They live in
//! the reserved client-info ping, which is never submitted; the ping
//! assembler reads them to build the `client_info` section of every
//! envelope.

use crate::common::{CommonMetricData, Lifetime};
use crate::constants::CLIENT_INFO_STORAGE;
use crate::metrics::{DatetimeMetric, StringMetric, TimeUnit, UuidMetric};

#[derive(Debug)]
pub struct CoreMetrics {
    pub client_id: UuidMetric,
    pub first_run_date: DatetimeMetric,
    pub os: StringMetric,
    pub os_version: StringMetric,
    pub architecture: StringMetric,
    pub locale: StringMetric,
    pub app_build: StringMetric,
    pub app_display_version: StringMetric,
    pub app_channel: StringMetric,
    pub build_date: DatetimeMetric,
}

fn client_info_meta(name: &str, lifetime: Lifetime) -> CommonMetricData {
    CommonMetricData {
        name: name.into(),
        category: "".into(),
        send_in_pings: vec![CLIENT_INFO_STORAGE.into()],
        lifetime,
        disabled: false,
        dynamic_label: None,
    }
}

impl CoreMetrics {
    pub fn new() -> Self {
        Self {
            client_id: UuidMetric::new(client_info_meta("client_id", Lifetime::User)),
            first_run_date: DatetimeMetric::new(
                client_info_meta("first_run_date", Lifetime::User),
                TimeUnit::Day,
            ),
            os: StringMetric::new(client_info_meta("os", Lifetime::Application)),
            os_version: StringMetric::new(client_info_meta("os_version", Lifetime::Application)),
            architecture: StringMetric::new(client_info_meta(
                "architecture",
                Lifetime::Application,
            )),
            locale: StringMetric::new(client_info_meta("locale", Lifetime::Application)),
            app_build: StringMetric::new(client_info_meta("app_build", Lifetime::Application)),
            app_display_version: StringMetric::new(client_info_meta(
                "app_display_version",
                Lifetime::Application,
            )),
            app_channel: StringMetric::new(client_info_meta("app_channel", Lifetime::Application)),
            build_date: DatetimeMetric::new(
                client_info_meta("build_date", Lifetime::Application),
                TimeUnit::Second,
            ),
        }
    }
}

impl Default for CoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}
