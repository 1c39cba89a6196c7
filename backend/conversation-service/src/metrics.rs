use actix_web::{http::header, HttpResponse};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, TextEncoder};

static MESSAGES_SENT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "conversation_service_messages_sent_total",
            "Messages appended, by message type",
        ),
        &["type"],
    )
    .expect("failed to create conversation_service_messages_sent_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register conversation_service_messages_sent_total");
    counter
});

static CHANNEL_AUTH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "conversation_service_channel_auth_total",
            "Channel authorization decisions, by channel kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("failed to create conversation_service_channel_auth_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register conversation_service_channel_auth_total");
    counter
});

static STORE_TIMEOUTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "conversation_service_store_timeouts_total",
        "Store calls abandoned after the configured timeout",
    )
    .expect("failed to create conversation_service_store_timeouts_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register conversation_service_store_timeouts_total");
    counter
});

pub fn record_message_sent(message_type: &str) {
    MESSAGES_SENT_TOTAL.with_label_values(&[message_type]).inc();
}

pub fn record_channel_auth(kind: &str, outcome: &str) {
    CHANNEL_AUTH_TOTAL.with_label_values(&[kind, outcome]).inc();
}

pub fn record_store_timeout() {
    STORE_TIMEOUTS_TOTAL.inc();
}

/// Prometheus text exposition of the default registry
pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, encoder.format_type()))
        .body(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_registered() {
        record_message_sent("text");
        record_channel_auth("user", "granted");
        record_store_timeout();

        let names: Vec<String> = prometheus::gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"conversation_service_messages_sent_total".to_string()));
        assert!(names.contains(&"conversation_service_channel_auth_total".to_string()));
        assert!(names.contains(&"conversation_service_store_timeouts_total".to_string()));
    }
}
