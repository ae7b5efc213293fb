use axum::extract::ConnectInfo;
use axum::http::{Request, header};
use std::net::SocketAddr;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    trace::{MakeSpan, TraceLayer},
};
use tracing::{Span, info_span};

#[cfg(feature = "opentelemetry")]
use opentelemetry::{Context, propagation::Extractor, trace::TraceContextExt};
#[cfg(feature = "opentelemetry")]
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub type HttpTraceLayer = TraceLayer<SharedClassifier<ServerErrorsAsFailures>, GatewayMakeSpan>;

pub fn http_trace_layer() -> HttpTraceLayer {
    TraceLayer::new_for_http().make_span_with(GatewayMakeSpan)
}

/// 为每个请求创建 `http.request` span，WebSocket 握手额外标记 `upgrade`
#[derive(Clone, Debug, Default)]
pub struct GatewayMakeSpan;

impl<B> MakeSpan<B> for GatewayMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();

        let span = info_span!(
            "http.request",
            method = %request.method(),
            path = %request.uri().path(),
            peer = %peer,
            upgrade = is_websocket_upgrade(request),
        );

        #[cfg(feature = "opentelemetry")]
        if let Some(context) = extract_remote_context(request.headers()) {
            span.set_parent(context);
        }

        span
    }
}

fn is_websocket_upgrade<B>(request: &Request<B>) -> bool {
    request
        .headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

#[cfg(feature = "opentelemetry")]
fn extract_remote_context(headers: &axum::http::HeaderMap) -> Option<Context> {
    struct HeaderExtractor<'a>(&'a axum::http::HeaderMap);

    impl Extractor for HeaderExtractor<'_> {
        fn get(&self, key: &str) -> Option<&str> {
            self.0.get(key).and_then(|value| value.to_str().ok())
        }

        fn keys(&self) -> Vec<&str> {
            self.0.keys().map(|name| name.as_str()).collect()
        }
    }

    let context = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(headers))
    });
    let valid = context.span().span_context().is_valid();
    valid.then_some(context)
}
