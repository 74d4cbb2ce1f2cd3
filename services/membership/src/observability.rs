//! Observability wiring for the membership service.
//!
//! # Purpose
//! Sets up the `tracing` subscriber (fmt output, plus an OTLP span exporter when
//! one can be built), W3C trace-context extraction for inbound requests, and the
//! Prometheus recorder behind the `/metrics` listener.
//!
//! # Key invariants
//! - Setup runs at most once per process; later calls return the same
//!   Prometheus handle. Tests call it freely.
//! - Every counter the service emits is listed in [`COUNTERS`] so it carries
//!   help text from the first scrape.
use axum::Router;
use axum::http::HeaderMap;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TRACING: OnceLock<()> = OnceLock::new();
static PROPAGATOR: OnceLock<()> = OnceLock::new();
static RECORDER: OnceLock<PrometheusHandle> = OnceLock::new();

/// Counters emitted by the service, with their help text.
pub const COUNTERS: [(&str, &str); 5] = [
    (
        "membership_enrollments_total",
        "Memberships created, labelled by operation",
    ),
    (
        "membership_removals_total",
        "Memberships removed, labelled by operation",
    ),
    (
        "group_sync_ops_total",
        "Provider group add/remove calls, labelled by op and outcome",
    ),
    (
        "identity_provisioning_total",
        "Provisioning saga runs, labelled by outcome",
    ),
    (
        "identity_token_fetch_total",
        "Token exchange attempts, labelled by outcome",
    ),
];

/// Environment variables copied onto the OTLP resource, in lookup order.
/// The first variable of a key that is set wins.
const RESOURCE_ENV: [(&str, &str); 7] = [
    ("service.instance.id", "MEMBERSHIP_SERVICE_INSTANCE_ID"),
    ("service.instance.id", "HOSTNAME"),
    ("k8s.cluster.name", "K8S_CLUSTER_NAME"),
    ("k8s.namespace.name", "K8S_NAMESPACE_NAME"),
    ("k8s.pod.name", "K8S_POD_NAME"),
    ("cloud.region", "CLOUD_REGION"),
    ("deployment.environment", "DEPLOYMENT_ENVIRONMENT"),
];

/// Install tracing and the metrics recorder.
///
/// `RUST_LOG` controls the filter; it defaults to `info`.
pub fn init_observability(service_name: &str) -> PrometheusHandle {
    TRACING.get_or_init(|| {
        install_propagator();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        match tracer_provider(service_name) {
            Some(provider) => {
                let tracer = provider.tracer(service_name.to_string());
                let _ = registry
                    .with(tracing_opentelemetry::layer().with_tracer(tracer))
                    .try_init();
            }
            None => {
                let _ = registry.try_init();
            }
        }
    });
    metrics_handle()
}

fn install_propagator() {
    PROPAGATOR.get_or_init(|| global::set_text_map_propagator(TraceContextPropagator::new()));
}

fn tracer_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .ok()?;
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(service_name))
        .build();
    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let mut attrs = vec![KeyValue::new("service.name", service_name.to_string())];
    for (key, var) in RESOURCE_ENV {
        if attrs.iter().any(|attr| attr.key.as_str() == key) {
            continue;
        }
        if let Ok(value) = std::env::var(var) {
            attrs.push(KeyValue::new(key, value));
        }
    }
    attrs
}

/// Parent context carried by `traceparent`/`tracestate`, or an empty context.
pub fn trace_context_from_headers(headers: &HeaderMap) -> opentelemetry::Context {
    install_propagator();
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

fn metrics_handle() -> PrometheusHandle {
    RECORDER
        .get_or_init(|| {
            let handle = match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => handle,
                Err(err) => {
                    // The global slot is taken; render from a detached recorder.
                    tracing::warn!(error = %err, "metrics recorder already installed");
                    PrometheusBuilder::new().build_recorder().handle()
                }
            };
            for (name, help) in COUNTERS {
                metrics::describe_counter!(name, help);
            }
            handle
        })
        .clone()
}

fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

/// Serve `/metrics` on `addr` until the task is aborted.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics listening");
    axum::serve(listener, metrics_router(handle).into_make_service()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request, StatusCode};
    use opentelemetry::trace::{TraceContextExt, TraceId};
    use serial_test::serial;
    use tower::ServiceExt;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn with_env<T>(vars: &[(&'static str, Option<&str>)], f: impl FnOnce() -> T) -> T {
        let saved: Vec<_> = vars
            .iter()
            .map(|(key, _)| (*key, std::env::var(key).ok()))
            .collect();
        for (key, value) in vars {
            match value {
                Some(value) => unsafe { std::env::set_var(key, value) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
        let out = f();
        for (key, value) in saved {
            match value {
                Some(value) => unsafe { std::env::set_var(key, value) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
        out
    }

    fn attribute(attrs: &[KeyValue], key: &str) -> Option<String> {
        attrs
            .iter()
            .find(|attr| attr.key.as_str() == key)
            .map(|attr| attr.value.to_string())
    }

    #[test]
    #[serial]
    fn resource_attributes_come_from_env() {
        let attrs = with_env(
            &[
                ("MEMBERSHIP_SERVICE_INSTANCE_ID", Some("instance-1")),
                ("HOSTNAME", Some("host-1")),
                ("K8S_NAMESPACE_NAME", Some("identity")),
                ("DEPLOYMENT_ENVIRONMENT", Some("staging")),
                ("CLOUD_REGION", None),
            ],
            || resource_attributes("membership"),
        );
        assert_eq!(attribute(&attrs, "service.name").as_deref(), Some("membership"));
        assert_eq!(
            attribute(&attrs, "service.instance.id").as_deref(),
            Some("instance-1")
        );
        assert_eq!(
            attribute(&attrs, "k8s.namespace.name").as_deref(),
            Some("identity")
        );
        assert_eq!(
            attribute(&attrs, "deployment.environment").as_deref(),
            Some("staging")
        );
        assert_eq!(attribute(&attrs, "cloud.region"), None);
        assert_eq!(
            attrs
                .iter()
                .filter(|attr| attr.key.as_str() == "service.instance.id")
                .count(),
            1
        );
    }

    #[test]
    #[serial]
    fn instance_id_falls_back_to_hostname() {
        let attrs = with_env(
            &[
                ("MEMBERSHIP_SERVICE_INSTANCE_ID", None),
                ("HOSTNAME", Some("host-1")),
            ],
            || resource_attributes("membership"),
        );
        assert_eq!(
            attribute(&attrs, "service.instance.id").as_deref(),
            Some("host-1")
        );
    }

    #[test]
    fn trace_context_is_extracted_from_traceparent() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", HeaderValue::from_static(TRACEPARENT));
        let context = trace_context_from_headers(&headers);
        let span = context.span();
        let span_context = span.span_context();
        assert!(span_context.is_valid());
        assert_eq!(
            span_context.trace_id(),
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
        );
    }

    #[test]
    fn non_utf8_headers_are_skipped() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", HeaderValue::from_bytes(b"\xFF").unwrap());
        headers.insert("tracestate", HeaderValue::from_static("congo=t61rcWkgMzE"));
        let extractor = HeaderExtractor(&headers);
        assert!(extractor.get("traceparent").is_none());
        assert_eq!(extractor.get("tracestate"), Some("congo=t61rcWkgMzE"));
        assert!(!trace_context_from_headers(&headers).span().span_context().is_valid());
    }

    #[tokio::test]
    #[serial]
    async fn metrics_endpoint_renders_counters() {
        let handle = init_observability("membership-test");
        let _ = init_observability("membership-test").render();
        metrics::counter!("membership_enrollments_total", "op" => "add_members").increment(1);

        let response = metrics_router(handle)
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("membership_enrollments_total"));
    }
}
