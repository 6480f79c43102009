use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    HistogramVec, IntCounterVec, IntGaugeVec,
};

lazy_static! {
    pub static ref STORE_OPERATION_DURATION: HistogramVec = register_histogram_vec!(
        "colkit_store_operation_duration_seconds",
        "Record store operation duration in seconds",
        &["operation", "keyspace", "status"]
    ).unwrap();

    pub static ref POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "colkit_pool_connections",
        "Connections held by a pool, by state",
        &["keyspace", "state"]
    ).unwrap();

    pub static ref POOL_EVENTS: IntCounterVec = register_int_counter_vec!(
        "colkit_pool_events_total",
        "Connection lifecycle events",
        &["keyspace", "event"]
    ).unwrap();
}

pub fn record_operation(operation: &str, keyspace: &str, success: bool, duration: f64) {
    let status = if success { "success" } else { "failure" };
    STORE_OPERATION_DURATION
        .with_label_values(&[operation, keyspace, status])
        .observe(duration);
}

pub fn record_pool_event(keyspace: &str, event: &str) {
    POOL_EVENTS.with_label_values(&[keyspace, event]).inc();
}

pub fn set_pool_connections(keyspace: &str, live: usize, idle: usize) {
    POOL_CONNECTIONS
        .with_label_values(&[keyspace, "live"])
        .set(live as i64);
    POOL_CONNECTIONS
        .with_label_values(&[keyspace, "idle"])
        .set(idle as i64);
}
