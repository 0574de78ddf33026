use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "relay.request.duration",
    metric_type: MetricType::Histogram,
    description: "Relayed request duration in seconds. Tagged with relay, outcome.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "relay.requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of submissions currently being relayed",
};

pub const UPSTREAM_OUTCOME: MetricDef = MetricDef {
    name: "relay.upstream.outcome",
    metric_type: MetricType::Counter,
    description: "Upstream exchanges by result. Tagged with relay, target, outcome.",
};

pub const ALL_METRICS: &[MetricDef] = &[REQUEST_DURATION, REQUESTS_INFLIGHT, UPSTREAM_OUTCOME];
