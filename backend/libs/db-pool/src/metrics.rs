//! Prometheus gauges for the database connection pool

use deadpool_postgres::Pool;
use prometheus::{register_gauge_vec, register_int_gauge_vec, GaugeVec, IntGaugeVec};

lazy_static::lazy_static! {
    /// Database connection pool size by state (idle/active/max)
    static ref DB_POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Database pool connection count by state",
        &["service", "state"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Pool utilization ratio (0.0 to 1.0)
    static ref DB_POOL_UTILIZATION: GaugeVec = register_gauge_vec!(
        "db_pool_utilization_ratio",
        "Pool utilization ratio (active/max)",
        &["service"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Update connection pool metrics (called periodically)
pub(crate) fn update_pool_metrics(pool: &Pool, service: &str) {
    let status = pool.status();
    let size = status.size as i64;
    let idle = status.available.max(0) as i64;
    let active = (size - idle).max(0);
    let max = status.max_size as i64;

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "idle"])
        .set(idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "active"])
        .set(active);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "max"])
        .set(max);

    DB_POOL_UTILIZATION
        .with_label_values(&[service])
        .set(utilization(active, max));
}

fn utilization(active: i64, max: i64) -> f64 {
    if max > 0 {
        active as f64 / max as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::utilization;

    #[test]
    fn test_utilization_ratio() {
        assert_eq!(utilization(5, 10), 0.5);
        assert_eq!(utilization(0, 0), 0.0);
    }
}
