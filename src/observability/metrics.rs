//! Metrics for the twinhub services, exposed in Prometheus format.
//!
//! Counter names follow the `twinhub_<area>_<event>_total` convention.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder once per process and return the render
/// handle. Safe to call repeatedly (tests, embedded servers).
pub fn install() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// Render the current metrics snapshot, if the recorder is installed.
pub fn render() -> String {
    HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

pub mod api {
    pub fn request(route: String) {
        ::metrics::counter!("twinhub_api_requests_total", "route" => route).increment(1);
    }

    pub fn request_error(route: String) {
        ::metrics::counter!("twinhub_api_request_errors_total", "route" => route).increment(1);
    }
}

pub mod scheduler {
    pub fn sweep_duration(duration_secs: f64) {
        ::metrics::histogram!("twinhub_scheduler_sweep_duration_seconds").record(duration_secs);
    }

    pub fn inspection_records_created(count: u64) {
        ::metrics::counter!("twinhub_scheduler_inspection_records_created_total").increment(count);
    }

    pub fn occurrences_suppressed() {
        ::metrics::counter!("twinhub_scheduler_occurrences_suppressed_total").increment(1);
    }

    pub fn scheduled_tickets_created(count: u64) {
        ::metrics::counter!("twinhub_scheduler_tickets_created_total").increment(count);
    }
}

pub mod uploads {
    pub fn modules_accepted(count: u64) {
        ::metrics::counter!("twinhub_uploads_modules_accepted_total").increment(count);
    }

    pub fn modules_rejected(error_count: u64) {
        ::metrics::counter!("twinhub_uploads_modules_rejected_total").increment(error_count);
    }
}

pub mod clients {
    pub fn notification_sent() {
        ::metrics::counter!("twinhub_clients_notifications_sent_total").increment(1);
    }

    pub fn notification_failed() {
        ::metrics::counter!("twinhub_clients_notifications_failed_total").increment(1);
    }

    pub fn image_hub_request() {
        ::metrics::counter!("twinhub_clients_image_hub_requests_total").increment(1);
    }
}
