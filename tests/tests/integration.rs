//! End-to-end orchestration scenarios against mock services and a
//! scripted oracle.

use capstan_foundation::orchestrator::OrchestrateOptions;
use capstan_kernel::service::{
    CapabilityDescriptor, FieldSchema, SemanticType, ServiceDescriptor, ServiceKind,
};
use capstan_kernel::telemetry::ObservabilityEvent;
use capstan_testing::{MockService, ScriptedOracle, TestRuntime};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

fn weather_descriptor(address: &str) -> ServiceDescriptor {
    ServiceDescriptor::new("wt-1", "weather-tool-v2", ServiceKind::Tool, address).with_capability(
        CapabilityDescriptor::new("get_current_weather", "/api/capabilities/weather")
            .with_summary("Current weather for a coordinate pair")
            .with_output_hint("{temp_c, conditions}")
            .with_field(FieldSchema::required("lat", SemanticType::Number).with_example(json!(48.85)))
            .with_field(FieldSchema::required("lon", SemanticType::Number).with_example(json!(2.35))),
    )
}

fn geocoder_descriptor(address: &str) -> ServiceDescriptor {
    ServiceDescriptor::new("geo-1", "geocoding-tool", ServiceKind::Tool, address).with_capability(
        CapabilityDescriptor::new("geocode", "/api/capabilities/geocode")
            .with_summary("Resolve a place name to coordinates")
            .with_output_hint("{lat, lon}")
            .with_field(
                FieldSchema::required("location", SemanticType::String).with_example(json!("Tokyo")),
            ),
    )
}

fn no_synthesis() -> OrchestrateOptions {
    OrchestrateOptions {
        ai_synthesis: false,
        ..OrchestrateOptions::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: single-step success with Layer-2 coercion
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_step_weather_request() {
    let weather = MockService::start(vec![(
        "/api/capabilities/weather",
        MockService::ok(json!({"temp_c": 18.5, "conditions": "clear"})),
    )])
    .await;

    let oracle = Arc::new(ScriptedOracle::replaying([
        r#"{"steps": [{
            "step_id": "weather",
            "service_name": "weather-tool-v2",
            "capability_name": "get_current_weather",
            "instruction": "Fetch current weather for Paris",
            "depends_on": [],
            "parameters": {"lat": "48.8566", "lon": "2.3522"},
            "required": true
        }]}"#,
    ]));
    let runtime = TestRuntime::with_oracle(oracle.clone()).await;
    runtime.register(weather_descriptor(&weather.address)).await;

    let result = runtime
        .orchestrator
        .orchestrate_natural("What is the weather in Paris?", no_synthesis())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.tools_used, vec!["weather-tool-v2"]);
    assert_eq!(result.step_results.len(), 1);
    assert_eq!(result.step_results[0].step_id, "step-1-get_current_weather");

    // The LLM emitted strings; Layer 2 must deliver typed numbers, and
    // no Layer-3 call may happen (plan generation was the only call).
    let bodies = weather.received_on("/api/capabilities/weather");
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["lat"], json!(48.8566));
    assert!(bodies[0]["lat"].is_number());
    assert_eq!(oracle.call_count(), 1);
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: two-step linear dependency with typed template flow
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_step_linear_dependency() {
    let geocoder = MockService::start(vec![(
        "/api/capabilities/geocode",
        MockService::ok(json!({"lat": 35.6762, "lon": 139.6503})),
    )])
    .await;
    let weather = MockService::start(vec![(
        "/api/capabilities/weather",
        MockService::ok(json!({"temp_c": 22.0, "conditions": "humid"})),
    )])
    .await;

    let oracle = Arc::new(ScriptedOracle::replaying([
        r#"{"steps": [
            {"step_id": "geo", "service_name": "geocoding-tool", "capability_name": "geocode",
             "instruction": "Geocode Tokyo", "parameters": {"location": "Tokyo"}},
            {"step_id": "weather", "service_name": "weather-tool-v2",
             "capability_name": "get_current_weather", "instruction": "Weather at the coordinates",
             "depends_on": ["geo"],
             "parameters": {"lat": "{{geo.data.lat}}", "lon": "{{geo.data.lon}}"}}
        ]}"#,
    ]));
    let runtime = TestRuntime::with_oracle(oracle.clone()).await;
    runtime.register(geocoder_descriptor(&geocoder.address)).await;
    runtime.register(weather_descriptor(&weather.address)).await;

    let result = runtime
        .orchestrator
        .orchestrate_natural("Weather in Tokyo", no_synthesis())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.step_results.len(), 2);
    assert_eq!(result.step_results[0].step_id, "step-1-geocode");
    assert_eq!(result.step_results[1].step_id, "step-2-get_current_weather");

    // The geocoder's numeric output must arrive at the weather service
    // with its native type preserved.
    let bodies = weather.received_on("/api/capabilities/weather");
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["lat"], json!(35.6762));
    assert_eq!(bodies[0]["lon"], json!(139.6503));
    assert!(bodies[0]["lat"].is_number());
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: parallel fan-out with serialised completions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_fan_out_runs_concurrently() {
    let delay = Duration::from_millis(300);
    let slow_ok = |body: Value| -> capstan_testing::services::Responder {
        Arc::new(move |_| {
            std::thread::sleep(delay);
            (200, body.clone())
        })
    };

    let country = MockService::start(vec![(
        "/api/capabilities/country",
        slow_ok(json!({"name": "Japan", "capital": "Tokyo", "population": 125_700_000})),
    )])
    .await;
    let geocoder = MockService::start(vec![(
        "/api/capabilities/geocode",
        slow_ok(json!({"lat": 35.6762, "lon": 139.6503})),
    )])
    .await;
    let weather = MockService::start(vec![(
        "/api/capabilities/weather",
        MockService::ok(json!({"temp_c": 22.0})),
    )])
    .await;

    let country_descriptor =
        ServiceDescriptor::new("ci-1", "country-info", ServiceKind::Tool, &country.address)
            .with_capability(
                CapabilityDescriptor::new("get_country_info", "/api/capabilities/country")
                    .with_summary("Country facts")
                    .with_field(
                        FieldSchema::required("country", SemanticType::String)
                            .with_example(json!("Japan")),
                    ),
            );

    let oracle = Arc::new(ScriptedOracle::replaying([
        r#"{"steps": [
            {"step_id": "country", "service_name": "country-info",
             "capability_name": "get_country_info", "instruction": "Facts about Japan",
             "parameters": {"country": "Japan"}, "parallel": true},
            {"step_id": "geo", "service_name": "geocoding-tool", "capability_name": "geocode",
             "instruction": "Geocode Tokyo", "parameters": {"location": "Tokyo"}, "parallel": true},
            {"step_id": "weather", "service_name": "weather-tool-v2",
             "capability_name": "get_current_weather", "instruction": "Weather in Tokyo",
             "depends_on": ["geo"],
             "parameters": {"lat": "{{geo.data.lat}}", "lon": "{{geo.data.lon}}"}}
        ]}"#,
    ]));
    let runtime = TestRuntime::with_oracle(oracle).await;
    runtime.register(country_descriptor).await;
    runtime.register(geocoder_descriptor(&geocoder.address)).await;
    runtime.register(weather_descriptor(&weather.address)).await;

    let (tx, mut rx) = mpsc::channel(16);
    let options = OrchestrateOptions {
        ai_synthesis: false,
        completions: Some(tx),
        ..OrchestrateOptions::default()
    };

    let started = Instant::now();
    let result = runtime
        .orchestrator
        .orchestrate_natural("Tell me about Japan and its weather in Tokyo", options)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(result.success);
    assert_eq!(result.step_results.len(), 3);

    // country-info and geocode overlap: three steps two of which sleep
    // 300ms each must finish well under the ~600ms serial floor.
    assert!(
        elapsed < Duration::from_millis(550),
        "expected concurrent fan-out, took {elapsed:?}"
    );

    // Exactly one serialised completion per step; weather only after
    // its geocode dependency.
    let mut completions = Vec::new();
    while let Ok(completion) = rx.try_recv() {
        completions.push(completion);
    }
    assert_eq!(completions.len(), 3);
    let position = |id: &str| {
        completions
            .iter()
            .position(|c| c.step_id.contains(id))
            .unwrap()
    };
    assert!(position("geocode") < position("get_current_weather"));
    let ordinals: Vec<u32> = completions.iter().map(|c| c.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2, 3]);
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: Layer-3 repair after a structured 400
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn layer3_repairs_rejected_parameter() {
    let country = MockService::start(vec![(
        "/api/capabilities/country",
        Arc::new(|body: &Value| -> (u16, Value) {
            if body["country"] == json!("대한민국") {
                (400, json!({"error": "country parameter must be ISO code"}))
            } else {
                (200, json!({"name": "South Korea", "capital": "Seoul"}))
            }
        }) as capstan_testing::services::Responder,
    )])
    .await;

    let descriptor =
        ServiceDescriptor::new("ci-1", "country-info", ServiceKind::Tool, &country.address)
            .with_capability(
                CapabilityDescriptor::new("get_country_info", "/api/capabilities/country")
                    .with_summary("Country facts")
                    .with_field(
                        FieldSchema::required("country", SemanticType::String)
                            .with_description("Country name in English, or ISO code"),
                    ),
            );

    let oracle = Arc::new(ScriptedOracle::replaying([
        // Plan with the value the service will reject.
        r#"{"steps": [{
            "step_id": "country", "service_name": "country-info",
            "capability_name": "get_country_info", "instruction": "Facts about Korea",
            "parameters": {"country": "대한민국"}
        }]}"#,
        // Layer-3 micro-resolution emits a JSON literal for the field.
        r#""South Korea""#,
    ]));
    let runtime = TestRuntime::with_oracle(oracle.clone()).await;
    runtime.register(descriptor).await;

    let result = runtime
        .orchestrator
        .orchestrate_natural("Tell me about 대한민국", no_synthesis())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.step_results[0].retry_count, 1);

    let bodies = country.received_on("/api/capabilities/country");
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[1]["country"], json!("South Korea"));

    let labels = runtime.sink.labels();
    assert!(labels.contains(&"micro_resolution.start"));
    assert!(labels.contains(&"micro_resolution.complete"));
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: Layer-4 semantic retry with a trajectory-derived fix
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn layer4_semantic_retry_recomputes_amount() {
    let rates = MockService::start(vec![(
        "/api/capabilities/rate",
        MockService::ok(json!({"pair": "USD/KRW", "rate": 79.0})),
    )])
    .await;
    let fx = MockService::start(vec![(
        "/api/capabilities/convert",
        Arc::new(|body: &Value| -> (u16, Value) {
            if body["amount"] == json!(79000.0) || body["amount"] == json!(79000) {
                (200, json!({"converted": 79000, "currency": "KRW"}))
            } else {
                // 2xx with a structured error: the parameters
                // type-checked but meant the wrong thing.
                (200, json!({"error": "amount must be pre-multiplied by the exchange rate"}))
            }
        }) as capstan_testing::services::Responder,
    )])
    .await;

    let rates_descriptor =
        ServiceDescriptor::new("rt-1", "rates-tool", ServiceKind::Tool, &rates.address)
            .with_capability(
                CapabilityDescriptor::new("get_rate", "/api/capabilities/rate")
                    .with_summary("Exchange rate for a currency pair")
                    .with_field(
                        FieldSchema::required("pair", SemanticType::String)
                            .with_example(json!("USD/KRW")),
                    ),
            );
    let fx_descriptor = ServiceDescriptor::new("fx-1", "fx-tool", ServiceKind::Tool, &fx.address)
        .with_capability(
            CapabilityDescriptor::new("convert", "/api/capabilities/convert")
                .with_summary("Currency conversion")
                .with_field(FieldSchema::required("amount", SemanticType::Number))
                .with_field(FieldSchema::required("from", SemanticType::String))
                .with_field(FieldSchema::required("to", SemanticType::String)),
        );

    let oracle = Arc::new(ScriptedOracle::replaying([
        r#"{"steps": [
            {"step_id": "rate", "service_name": "rates-tool", "capability_name": "get_rate",
             "instruction": "Fetch the USD/KRW rate", "parameters": {"pair": "USD/KRW"}},
            {"step_id": "convert", "service_name": "fx-tool", "capability_name": "convert",
             "instruction": "Convert 1000 USD to KRW", "depends_on": ["rate"],
             "parameters": {"amount": "1000", "from": "USD", "to": "KRW"}}
        ]}"#,
        // Layer-4: the corrected set computed from the trajectory.
        r#"{"should_retry": true,
            "parameters": {"amount": 79000, "from": "USD", "to": "KRW"}}"#,
    ]));
    let runtime = TestRuntime::with_oracle(oracle.clone()).await;
    runtime.register(rates_descriptor).await;
    runtime.register(fx_descriptor).await;

    let result = runtime
        .orchestrator
        .orchestrate_natural("Convert 1000 USD to Korean won", no_synthesis())
        .await
        .unwrap();

    assert!(result.success);
    let convert_result = result
        .step_results
        .iter()
        .find(|r| r.step_id == "step-2-convert")
        .unwrap();
    assert!(convert_result.success);
    assert_eq!(convert_result.retry_count, 1);

    let bodies = fx.received_on("/api/capabilities/convert");
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[1]["amount"].as_f64(), Some(79000.0));

    // The contextual re-resolution completed with a retry verdict.
    let retried = runtime.sink.events().iter().any(|event| {
        matches!(
            event,
            ObservabilityEvent::ContextualReResolutionComplete { should_retry: true, .. }
        )
    });
    assert!(retried, "expected contextual_re_resolution.complete with should_retry=true");
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Boundary: semantic retry budget exhaustion fails without extra calls
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn semantic_retry_budget_exhaustion_surfaces_step_failure() {
    let attempt = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let fx = MockService::start(vec![(
        "/api/capabilities/convert",
        {
            let attempt = Arc::clone(&attempt);
            Arc::new(move |_: &Value| -> (u16, Value) {
                let n = attempt.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                // Distinct messages keep the analyzer from declaring a
                // repeated identical failure before the budget is hit.
                (200, json!({"error": format!("conversion rejected, variant {n}")}))
            }) as capstan_testing::services::Responder
        },
    )])
    .await;

    let fx_descriptor = ServiceDescriptor::new("fx-1", "fx-tool", ServiceKind::Tool, &fx.address)
        .with_capability(
            CapabilityDescriptor::new("convert", "/api/capabilities/convert")
                .with_summary("Currency conversion")
                .with_field(FieldSchema::required("amount", SemanticType::Number)),
        );

    let oracle = Arc::new(ScriptedOracle::replaying([
        r#"{"steps": [{
            "step_id": "convert", "service_name": "fx-tool", "capability_name": "convert",
            "instruction": "Convert", "parameters": {"amount": "1000"}
        }]}"#,
        r#"{"should_retry": true, "parameters": {"amount": 2000}}"#,
        r#"{"should_retry": true, "parameters": {"amount": 3000}}"#,
    ]));
    let runtime = TestRuntime::with_oracle(oracle.clone()).await;
    runtime.register(fx_descriptor).await;

    let result = runtime
        .orchestrator
        .orchestrate_natural("Convert 1000 USD", no_synthesis())
        .await
        .unwrap();

    // Two semantic retries (the configured max), then failure — and no
    // oracle call beyond the scripted three.
    assert!(!result.success);
    assert_eq!(result.confidence, 0.0);
    assert_eq!(oracle.call_count(), 3);
    assert_eq!(fx.received_on("/api/capabilities/convert").len(), 3);
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Boundary: zero-step plans return immediately
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn zero_step_plan_short_circuits() {
    let weather = MockService::start(vec![(
        "/api/capabilities/weather",
        MockService::ok(json!({})),
    )])
    .await;
    let oracle = Arc::new(ScriptedOracle::replaying([r#"{"steps": []}"#]));
    let runtime = TestRuntime::with_oracle(oracle).await;
    runtime.register(weather_descriptor(&weather.address)).await;

    let result = runtime
        .orchestrator
        .orchestrate_natural("Do nothing in particular", no_synthesis())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.confidence, 1.0);
    assert!(result.step_results.is_empty());
    assert!(weather.received().is_empty());
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Planner rejection feedback loop
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_plan_is_reprompted_then_accepted() {
    let weather = MockService::start(vec![(
        "/api/capabilities/weather",
        MockService::ok(json!({"temp_c": 3.0})),
    )])
    .await;

    let oracle = Arc::new(ScriptedOracle::replaying([
        // First attempt references a capability that does not exist.
        r#"{"steps": [{
            "step_id": "w", "service_name": "weather-tool-v2",
            "capability_name": "get_forecast", "parameters": {}
        }]}"#,
        // Second attempt is valid.
        r#"{"steps": [{
            "step_id": "w", "service_name": "weather-tool-v2",
            "capability_name": "get_current_weather",
            "parameters": {"lat": "60.17", "lon": "24.94"}
        }]}"#,
    ]));
    let runtime = TestRuntime::with_oracle(oracle.clone()).await;
    runtime.register(weather_descriptor(&weather.address)).await;

    let result = runtime
        .orchestrator
        .orchestrate_natural("Weather in Helsinki", no_synthesis())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(oracle.call_count(), 2);
    // The re-prompt must carry the rejection reason.
    assert!(oracle.prompts()[1].contains("rejected"));
    assert!(oracle.prompts()[1].contains("get_forecast"));
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflow mode
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn workflow_instantiation_and_execution() {
    use capstan_foundation::planner::{WorkflowParameter, WorkflowTemplate};
    use capstan_kernel::plan::{PlanMode, Step};

    let geocoder = MockService::start(vec![(
        "/api/capabilities/geocode",
        MockService::ok(json!({"lat": 48.8566, "lon": 2.3522})),
    )])
    .await;
    let weather = MockService::start(vec![(
        "/api/capabilities/weather",
        MockService::ok(json!({"temp_c": 11.0})),
    )])
    .await;

    let oracle = Arc::new(ScriptedOracle::empty());
    let runtime = TestRuntime::with_oracle(oracle.clone()).await;
    runtime.register(geocoder_descriptor(&geocoder.address)).await;
    runtime.register(weather_descriptor(&weather.address)).await;

    runtime
        .orchestrator
        .workflows()
        .register(
            WorkflowTemplate::new("city-weather", "Geocode a city and fetch its weather")
                .with_parameter(WorkflowParameter::required("city"))
                .with_step(
                    Step::new("step-1-geocode", "geocoding-tool", "geocode")
                        .with_parameter("location", json!("{{city}}")),
                )
                .with_step(
                    Step::new("step-2-get_current_weather", "weather-tool-v2", "get_current_weather")
                        .depends_on("step-1-geocode")
                        .with_parameter("lat", json!("{{step-1-geocode.data.lat}}"))
                        .with_parameter("lon", json!("{{step-1-geocode.data.lon}}")),
                ),
        )
        .unwrap();

    let result = runtime
        .orchestrator
        .orchestrate_workflow(
            "city-weather",
            &[("city".to_string(), json!("Paris"))].into(),
            no_synthesis(),
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.execution_plan.mode, PlanMode::Workflow);
    // The whole flow ran without a single oracle call.
    assert_eq!(oracle.call_count(), 0);
    let geocode_bodies = geocoder.received_on("/api/capabilities/geocode");
    assert_eq!(geocode_bodies[0]["location"], json!("Paris"));
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesis toggle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn synthesis_runs_only_when_requested() {
    let weather = MockService::start(vec![(
        "/api/capabilities/weather",
        MockService::ok(json!({"temp_c": 18.5})),
    )])
    .await;
    let plan = r#"{"steps": [{
        "step_id": "w", "service_name": "weather-tool-v2",
        "capability_name": "get_current_weather",
        "parameters": {"lat": "48.85", "lon": "2.35"}
    }]}"#;

    // With synthesis: plan + synthesis = two oracle calls.
    let oracle = Arc::new(ScriptedOracle::replaying([
        plan,
        "It is 18.5°C in Paris right now.",
    ]));
    let runtime = TestRuntime::with_oracle(oracle.clone()).await;
    runtime.register(weather_descriptor(&weather.address)).await;
    let result = runtime
        .orchestrator
        .orchestrate_natural("Weather in Paris?", OrchestrateOptions::default())
        .await
        .unwrap();
    assert_eq!(
        result.synthesized_response.as_deref(),
        Some("It is 18.5°C in Paris right now.")
    );
    assert_eq!(oracle.call_count(), 2);
    runtime.shutdown();

    // Without synthesis: the synthesiser is skipped entirely.
    let oracle = Arc::new(ScriptedOracle::replaying([plan]));
    let runtime = TestRuntime::with_oracle(oracle.clone()).await;
    runtime.register(weather_descriptor(&weather.address)).await;
    let result = runtime
        .orchestrator
        .orchestrate_natural("Weather in Paris?", no_synthesis())
        .await
        .unwrap();
    assert!(result.synthesized_response.is_none());
    assert_eq!(oracle.call_count(), 1);
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation: no new invocation after the cancellation instant
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_stops_the_wave() {
    use tokio_util::sync::CancellationToken;

    let geocoder = MockService::start(vec![(
        "/api/capabilities/geocode",
        Arc::new(|_: &Value| -> (u16, Value) {
            std::thread::sleep(Duration::from_millis(400));
            (200, json!({"lat": 1.0, "lon": 2.0}))
        }) as capstan_testing::services::Responder,
    )])
    .await;
    let weather = MockService::start(vec![(
        "/api/capabilities/weather",
        MockService::ok(json!({"temp_c": 9.0})),
    )])
    .await;

    let oracle = Arc::new(ScriptedOracle::replaying([
        r#"{"steps": [
            {"step_id": "geo", "service_name": "geocoding-tool", "capability_name": "geocode",
             "parameters": {"location": "Oslo"}},
            {"step_id": "weather", "service_name": "weather-tool-v2",
             "capability_name": "get_current_weather", "depends_on": ["geo"],
             "parameters": {"lat": "{{geo.data.lat}}", "lon": "{{geo.data.lon}}"}}
        ]}"#,
    ]));
    let runtime = TestRuntime::with_oracle(oracle).await;
    runtime.register(geocoder_descriptor(&geocoder.address)).await;
    runtime.register(weather_descriptor(&weather.address)).await;

    let cancel = CancellationToken::new();
    let options = OrchestrateOptions {
        ai_synthesis: false,
        cancel: cancel.clone(),
        ..OrchestrateOptions::default()
    };

    // Cancel while the geocode step is still in flight.
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        })
    };

    let error = runtime
        .orchestrator
        .orchestrate_natural("Weather in Oslo", options)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        capstan_kernel::error::OrchestratorError::Cancelled(_)
    ));
    canceller.await.unwrap();

    // The dependent step must never have been invoked.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(weather.received().is_empty());
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Required-step failure blocks dependents, spares independents
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn optional_step_failure_does_not_block_independents() {
    let flaky = MockService::start(vec![(
        "/api/capabilities/geocode",
        Arc::new(|_: &Value| -> (u16, Value) { (500, json!({"error": "backend down"})) })
            as capstan_testing::services::Responder,
    )])
    .await;
    let weather = MockService::start(vec![(
        "/api/capabilities/weather",
        MockService::ok(json!({"temp_c": 7.5})),
    )])
    .await;

    let oracle = Arc::new(ScriptedOracle::replaying([
        // The geocode step is optional; weather is independent of it.
        r#"{"steps": [
            {"step_id": "geo", "service_name": "geocoding-tool", "capability_name": "geocode",
             "parameters": {"location": "Nowhere"}, "required": false},
            {"step_id": "weather", "service_name": "weather-tool-v2",
             "capability_name": "get_current_weather",
             "parameters": {"lat": "10.0", "lon": "20.0"}}
        ]}"#,
    ]));
    let runtime = TestRuntime::with_oracle(oracle).await;
    runtime.register(geocoder_descriptor(&flaky.address)).await;
    runtime.register(weather_descriptor(&weather.address)).await;

    let result = runtime
        .orchestrator
        .orchestrate_natural("Weather at fixed coordinates", no_synthesis())
        .await
        .unwrap();

    // The optional step failed (mechanical retries exhausted), but the
    // required step succeeded, so the plan as a whole succeeds with
    // full confidence.
    assert!(result.success);
    assert_eq!(result.confidence, 1.0);
    let geo = result
        .step_results
        .iter()
        .find(|r| r.step_id == "step-1-geocode")
        .unwrap();
    assert!(!geo.success);
    assert!(geo.retry_count >= 1);
    let weather_result = result
        .step_results
        .iter()
        .find(|r| r.step_id == "step-2-get_current_weather")
        .unwrap();
    assert!(weather_result.success);
    runtime.shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Required-step failure skips its downstream cone
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_required_step_skips_its_dependents() {
    let fx = MockService::start(vec![(
        "/api/capabilities/convert",
        Arc::new(|_: &Value| -> (u16, Value) { (200, json!({"error": "conversion rejected"})) })
            as capstan_testing::services::Responder,
    )])
    .await;
    let summary = MockService::start(vec![(
        "/api/capabilities/render",
        MockService::ok(json!({"ok": true})),
    )])
    .await;

    let fx_descriptor = ServiceDescriptor::new("fx-1", "fx-tool", ServiceKind::Tool, &fx.address)
        .with_capability(
            CapabilityDescriptor::new("convert", "/api/capabilities/convert")
                .with_summary("Currency conversion")
                .with_field(FieldSchema::required("amount", SemanticType::Number)),
        );
    let summary_descriptor =
        ServiceDescriptor::new("sm-1", "summary-tool", ServiceKind::Tool, &summary.address)
            .with_capability(
                CapabilityDescriptor::new("render", "/api/capabilities/render")
                    .with_summary("Render a report line")
                    .with_field(FieldSchema::required("text", SemanticType::String)),
            );

    let oracle = Arc::new(ScriptedOracle::replaying([
        r#"{"steps": [
            {"step_id": "convert", "service_name": "fx-tool", "capability_name": "convert",
             "instruction": "Convert the amount", "parameters": {"amount": "1000"}},
            {"step_id": "report", "service_name": "summary-tool", "capability_name": "render",
             "instruction": "Report the converted amount", "depends_on": ["convert"],
             "parameters": {"text": "{{convert.data.converted}}"}}
        ]}"#,
        // Layer-4 declines: the failure is not a parameter problem.
        r#"{"should_retry": false, "reason": "the upstream service rejects this conversion"}"#,
    ]));
    let runtime = TestRuntime::with_oracle(oracle.clone()).await;
    runtime.register(fx_descriptor).await;
    runtime.register(summary_descriptor).await;

    let result = runtime
        .orchestrator
        .orchestrate_natural("Convert 1000 USD and report it", no_synthesis())
        .await
        .unwrap();

    assert!(!result.success);
    let convert = result
        .step_results
        .iter()
        .find(|r| r.step_id == "step-1-convert")
        .unwrap();
    assert!(!convert.success);
    assert!(!convert.skipped);

    let report = result
        .step_results
        .iter()
        .find(|r| r.step_id == "step-2-render")
        .unwrap();
    assert!(report.skipped);
    assert!(report
        .error
        .as_deref()
        .unwrap()
        .contains("upstream dependency failed"));

    // The dependent was never invoked, and no oracle call happened
    // beyond planning and the one Layer-4 consultation.
    assert!(summary.received().is_empty());
    assert_eq!(oracle.call_count(), 2);
    runtime.shutdown();
}
