use aiops_core::TelemetryRecord;
use chrono::{Duration, Utc};

pub const SERVICE_NAME: &str = "checkout-service";

/// Successful, consistently-latent traffic: an older batch (inside the
/// 60-minute baseline window but outside the 5-minute analysis window) that
/// anchors a learned baseline, plus two very recent requests at the same
/// latency so the endpoint doesn't read as silent.
pub fn baseline_only(endpoint: &str) -> Vec<TelemetryRecord> {
    let now = Utc::now();
    let mut records: Vec<TelemetryRecord> = (0..12)
        .map(|i| {
            TelemetryRecord::new(
                SERVICE_NAME,
                endpoint,
                "GET",
                200,
                50.0,
                None,
                format!("trace-baseline-{i}"),
                now - Duration::minutes(8) + Duration::seconds(i * 10),
            )
            .unwrap()
        })
        .collect();

    for i in 0..2 {
        records.push(
            TelemetryRecord::new(
                SERVICE_NAME,
                endpoint,
                "GET",
                200,
                50.0,
                None,
                format!("trace-recent-{i}"),
                now - Duration::seconds(60 - i * 20),
            )
            .unwrap(),
        );
    }

    records
}

/// Baseline traffic plus one very recent, large spike. The analysis window's
/// average blends the spike with the small amount of recent normal traffic,
/// so the spike has to clear the baseline by a wide margin to register -
/// exactly as it would in production.
pub fn latency_anomaly_medium(endpoint: &str) -> Vec<TelemetryRecord> {
    let now = Utc::now();
    let mut records = baseline_only(endpoint);
    records.push(
        TelemetryRecord::new(
            SERVICE_NAME,
            endpoint,
            "GET",
            200,
            500.0,
            None,
            "trace-latency-medium",
            now - Duration::seconds(5),
        )
        .unwrap(),
    );
    records
}

/// Same shape as [`latency_anomaly_medium`] but with a spike large enough to
/// push the windowed average past 5x the baseline - "high" severity.
pub fn latency_anomaly_high(endpoint: &str) -> Vec<TelemetryRecord> {
    let now = Utc::now();
    let mut records = baseline_only(endpoint);
    records.push(
        TelemetryRecord::new(
            SERVICE_NAME,
            endpoint,
            "GET",
            200,
            900.0,
            None,
            "trace-latency-high",
            now - Duration::seconds(5),
        )
        .unwrap(),
    );
    records
}

/// Five recent traces, each an upstream `/checkout` call followed by a
/// `/payment` call; three of the five fail at the `/payment` hop. Trips the
/// error-spike detector on `/payment` and gives the RCA engine a clear root
/// cause to vote for.
pub fn error_spike_with_root_cause() -> Vec<TelemetryRecord> {
    let now = Utc::now();
    let mut records = Vec::new();

    for i in 0..5 {
        let trace_id = format!("trace-err-{i}");
        let base_time = now - Duration::seconds(60 - i * 5);

        records.push(
            TelemetryRecord::new(
                SERVICE_NAME,
                "/checkout",
                "POST",
                200,
                20.0,
                None,
                trace_id.clone(),
                base_time,
            )
            .unwrap(),
        );

        let failing = i < 3;
        records.push(
            TelemetryRecord::new(
                SERVICE_NAME,
                "/payment",
                "POST",
                if failing { 503 } else { 200 },
                30.0,
                if failing {
                    Some("downstream payment gateway timeout".to_string())
                } else {
                    None
                },
                trace_id,
                base_time + Duration::milliseconds(50),
            )
            .unwrap(),
        );
    }

    records
}

/// An endpoint with plenty of traffic in the last hour but nothing in the
/// last 5 minutes - trips the silence detector.
pub fn silence_after_activity(endpoint: &str) -> Vec<TelemetryRecord> {
    let now = Utc::now();
    (0..15)
        .map(|i| {
            TelemetryRecord::new(
                SERVICE_NAME,
                endpoint,
                "GET",
                200,
                40.0,
                None,
                format!("trace-silence-{i}"),
                now - Duration::minutes(50) + Duration::minutes(i * 3),
            )
            .unwrap()
        })
        .collect()
}
