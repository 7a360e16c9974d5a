//! LLM agent behavior through the runner: tools, callbacks, transfer,
//! templating, budgets and structured output.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;

use arbor::agent::{Agent, LlmAgent};
use arbor::config::RunConfig;
use arbor::error::ArborError;
use arbor::model::LlmResponse;
use arbor::tools::{FunctionTool, Tool, ToolParameters};
use arbor::types::{Content, FunctionResponse, Part, Role, StreamingMode};

use common::*;

fn weather_tool(seen: Arc<Mutex<Vec<serde_json::Value>>>) -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        "get_weather",
        "Current weather for a city",
        ToolParameters::object()
            .string("city", "City name", true)
            .build(),
        move |args, _ctx| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(args.raw().clone());
                Ok(json!({ "forecast": "sunny" }))
            }
        },
    ))
}

#[tokio::test]
async fn tool_call_round_trip() {
    let model = Arc::new(
        ScriptedLlm::new("scripted")
            .call("c1", "get_weather", json!({"city": "Paris"}))
            .reply("It is sunny in Paris."),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let agent = LlmAgent::builder("assistant")
        .model(model.clone())
        .tool(weather_tool(seen.clone()))
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let events = harness.send("Weather in Paris?").await;

    assert_eq!(events.len(), 3);
    assert!(events[0].has_function_calls());
    assert!(events[1].has_function_responses());
    assert_eq!(events[1].content.as_ref().unwrap().role, Role::User);
    assert_eq!(events[2].text(), "It is sunny in Paris.");
    assert!(events[2].is_final_response());
    assert_eq!(*seen.lock().unwrap(), vec![json!({"city": "Paris"})]);

    let second = &model.requests()[1];
    let responses: Vec<&FunctionResponse> = second
        .contents
        .iter()
        .flat_map(|c| c.function_responses())
        .collect();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].response, json!({"forecast": "sunny"}));
    assert!(model.requests()[0].has_tool("get_weather"));

    // user message + three agent events
    assert_eq!(harness.session().await.events.len(), 4);
}

#[tokio::test]
async fn invalid_arguments_are_reported_to_the_model() {
    let model = Arc::new(
        ScriptedLlm::new("scripted")
            .call("c1", "get_weather", json!({"town": "Paris"}))
            .reply("Sorry."),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let agent = LlmAgent::builder("assistant")
        .model(model.clone())
        .tool(weather_tool(seen.clone()))
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let events = harness.send("Weather?").await;

    assert!(seen.lock().unwrap().is_empty());
    let response = events[1].content.as_ref().unwrap().function_responses()[0].clone();
    assert!(response.response["error"]
        .as_str()
        .unwrap()
        .contains("city"));
    assert_eq!(texts(&events), vec!["Sorry."]);
}

#[tokio::test]
async fn unknown_tool_becomes_error_payload() {
    let model = Arc::new(
        ScriptedLlm::new("scripted")
            .call("c1", "launch_rockets", json!({}))
            .reply("I cannot do that."),
    );
    let agent = LlmAgent::builder("assistant")
        .model(model.clone())
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let events = harness.send("Launch!").await;

    let response = &events[1].content.as_ref().unwrap().function_responses()[0].response;
    assert!(response["error"].as_str().unwrap().contains("launch_rockets"));
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn before_model_callback_skips_the_model() {
    let model = Arc::new(ScriptedLlm::new("scripted"));
    let agent = LlmAgent::builder("assistant")
        .model(model.clone())
        .before_model(|ctx, _request| {
            Box::pin(async move {
                ctx.state().set("cache_hit", json!(true));
                Ok(Some(LlmResponse::text("cached answer")))
            })
        })
        .after_model(|_ctx, _response| {
            Box::pin(async { Ok(Some(LlmResponse::text("rewritten"))) })
        })
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let events = harness.send("Hello").await;

    assert_eq!(model.calls(), 0);
    // a cached answer is the turn's result as is
    assert_eq!(texts(&events), vec!["cached answer"]);
    assert_eq!(events[0].actions.state_delta["cache_hit"], json!(true));
    let session = harness.session().await;
    assert_eq!(session.state.get("cache_hit").unwrap(), &json!(true));
}

#[tokio::test]
async fn after_model_callback_replaces_the_response() {
    let model = Arc::new(ScriptedLlm::new("scripted").reply("raw"));
    let agent = LlmAgent::builder("assistant")
        .model(model.clone())
        .after_model(|_ctx, response| {
            Box::pin(async move {
                let text = response.text_content();
                Ok(Some(LlmResponse::text(text.to_uppercase())))
            })
        })
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    assert_eq!(texts(&harness.send("hi").await), vec!["RAW"]);
}

#[tokio::test]
async fn before_tool_short_circuits_and_after_tool_rewrites() {
    let model = Arc::new(
        ScriptedLlm::new("scripted")
            .call("c1", "get_weather", json!({"city": "Oslo"}))
            .call("c2", "get_weather", json!({"city": "Rome"}))
            .reply("ok"),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let agent = LlmAgent::builder("assistant")
        .model(model.clone())
        .tool(weather_tool(seen.clone()))
        .before_tool(|_ctx, invocation| {
            Box::pin(async move {
                if invocation.args["city"] == "Oslo" {
                    return Ok(Some(json!({"forecast": "snow"})));
                }
                Ok(None)
            })
        })
        .after_tool(|ctx, outcome| {
            Box::pin(async move {
                ctx.state().set("temp:last_tool", json!(outcome.name.clone()));
                let mut response = outcome.response.clone();
                response["checked"] = json!(true);
                Ok(Some(response))
            })
        })
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let events = harness.send("Oslo then Rome").await;

    assert_eq!(*seen.lock().unwrap(), vec![json!({"city": "Rome"})]);
    let oslo = &events[1].content.as_ref().unwrap().function_responses()[0].response;
    // the override still passes through the after-tool interceptors
    assert_eq!(oslo, &json!({"forecast": "snow", "checked": true}));
    let rome = &events[3].content.as_ref().unwrap().function_responses()[0].response;
    assert_eq!(rome, &json!({"forecast": "sunny", "checked": true}));
    // temp keys are committed without their temp writes
    assert!(events[3].actions.state_delta.is_empty());
}

#[tokio::test]
async fn long_running_tool_resumes_on_client_response() {
    let model = Arc::new(
        ScriptedLlm::new("scripted")
            .call("approval-1", "ask_approval", json!({"amount": 100}))
            .reply("Refund approved and issued."),
    );
    let starts = Arc::new(AtomicUsize::new(0));
    let counter = starts.clone();
    let approval = FunctionTool::new(
        "ask_approval",
        "Ask a human to approve a refund",
        ToolParameters::object()
            .integer("amount", "Refund amount", true)
            .build(),
        move |_args, _ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(json!({"status": "pending"})) }
        },
    )
    .long_running();
    let agent = LlmAgent::builder("assistant")
        .model(model.clone())
        .tool(Arc::new(approval))
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    // Turn 1: the model asks for approval and the run pauses.
    let first = harness.send("Refund 100").await;
    assert_eq!(first.len(), 2);
    assert!(first[0]
        .actions
        .long_running_tool_ids
        .contains("approval-1"));
    assert!(first[0].is_final_response());
    assert_eq!(model.calls(), 1);

    // Turn 2: a progress update does not wake the model.
    let progress = Content::new(
        Role::User,
        vec![Part::FunctionResponse(
            FunctionResponse::new("approval-1", "ask_approval", json!({"status": "reviewing"}))
                .with_will_continue(true),
        )],
    );
    let second = harness.send_content(progress, RunConfig::default()).await;
    assert!(second.is_empty());
    assert_eq!(model.calls(), 1);

    // Turn 3: the final answer resumes the conversation.
    let done = function_response("approval-1", "ask_approval", json!({"status": "approved"}));
    let third = harness.send_content(done, RunConfig::default()).await;
    assert_eq!(texts(&third), vec!["Refund approved and issued."]);
    assert_eq!(model.calls(), 2);
    assert_eq!(starts.load(Ordering::SeqCst), 1);

    let responses: Vec<serde_json::Value> = model
        .last_request()
        .contents
        .iter()
        .flat_map(|c| c.function_responses())
        .map(|r| r.response.clone())
        .collect();
    assert_eq!(responses, vec![json!({"status": "approved"})]);
}

#[tokio::test]
async fn transfer_hands_the_conversation_to_a_sub_agent() {
    let coordinator_model = Arc::new(ScriptedLlm::new("coordinator").call(
        "t1",
        "transfer_to_agent",
        json!({"agent_name": "billing"}),
    ));
    let billing_model = Arc::new(
        ScriptedLlm::new("billing")
            .reply("Billing here, how can I help?")
            .reply("You're welcome."),
    );
    let billing = LlmAgent::builder("billing")
        .description("Handles invoices and refunds")
        .model(billing_model.clone())
        .build()
        .unwrap();
    let coordinator = LlmAgent::builder("coordinator")
        .model(coordinator_model.clone())
        .sub_agent(Arc::new(billing))
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(coordinator)).await;

    let events = harness.send("I have a billing question").await;

    assert_eq!(authors(&events), vec!["coordinator", "coordinator", "billing"]);
    assert_eq!(
        events[1].actions.transfer_to_agent.as_deref(),
        Some("billing")
    );
    let request = coordinator_model.last_request();
    assert!(request.has_tool("transfer_to_agent"));
    assert!(request
        .system_instruction
        .unwrap()
        .contains("Handles invoices and refunds"));

    // The next message goes straight to the agent that took over.
    let follow_up = harness.send("thanks").await;
    assert_eq!(authors(&follow_up), vec!["billing"]);
    assert_eq!(coordinator_model.calls(), 1);
    assert_eq!(billing_model.calls(), 2);
}

#[tokio::test]
async fn transfer_to_unknown_agent_fails_the_run() {
    let model = Arc::new(ScriptedLlm::new("scripted").call(
        "t1",
        "transfer_to_agent",
        json!({"agent_name": "ghost"}),
    ));
    let helper = LlmAgent::builder("helper")
        .model(Arc::new(ScriptedLlm::new("helper")))
        .build()
        .unwrap();
    let agent = LlmAgent::builder("root")
        .model(model)
        .sub_agent(Arc::new(helper))
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let results = collect(harness.stream(Content::user("go"), RunConfig::default())).await;
    assert!(matches!(
        results.last(),
        Some(Err(ArborError::Transfer(name))) if name == "ghost"
    ));
}

#[tokio::test]
async fn instruction_placeholders_read_session_state() {
    let model = Arc::new(ScriptedLlm::new("scripted").reply("Hi Ada"));
    let agent = LlmAgent::builder("greeter")
        .model(model.clone())
        .instruction("Greet {user:name}. Mood: {mood?}. Literal {{braces}}.")
        .build()
        .unwrap();
    let state = [("user:name".to_string(), json!("Ada"))].into_iter().collect();
    let harness = Harness::with_state(Arc::new(agent), state).await;

    harness.send("hello").await;

    assert_eq!(
        model.last_request().system_instruction.as_deref(),
        Some("Greet Ada. Mood: . Literal {braces}.")
    );
}

#[tokio::test]
async fn missing_instruction_key_is_a_state_error() {
    let model = Arc::new(ScriptedLlm::new("scripted"));
    let agent = LlmAgent::builder("greeter")
        .model(model.clone())
        .instruction("Greet {name}.")
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let results = collect(harness.stream(Content::user("hi"), RunConfig::default())).await;

    assert_eq!(results.len(), 2);
    let error_event = results[0].as_ref().unwrap();
    assert_eq!(error_event.error_code.as_deref(), Some("STATE_ERROR"));
    assert!(matches!(results[1], Err(ArborError::StateKeyNotFound(_))));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn llm_call_budget_is_enforced() {
    let noop = Arc::new(FunctionTool::new(
        "noop",
        "Does nothing",
        ToolParameters::empty(),
        |_args, _ctx| async move { Ok(json!({})) },
    ));
    let model = Arc::new(
        ScriptedLlm::new("scripted")
            .call("c1", "noop", json!({}))
            .call("c2", "noop", json!({}))
            .call("c3", "noop", json!({})),
    );
    let agent = LlmAgent::builder("busy")
        .model(model.clone())
        .tool(noop)
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let config = RunConfig::builder().max_llm_calls(2).build();
    let results = collect(harness.stream(Content::user("go"), config)).await;

    assert_eq!(model.calls(), 2);
    assert!(matches!(results.last(), Some(Err(ArborError::LlmCallLimit(2)))));
}

#[tokio::test]
async fn output_schema_stores_the_parsed_value() {
    let model = Arc::new(ScriptedLlm::new("scripted").reply(r#"{"name": "Ada", "age": 36}"#));
    let agent = LlmAgent::builder("extractor")
        .model(model.clone())
        .output_key("profile")
        .output_schema(json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"}
            },
            "required": ["name"]
        }))
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    harness.send("Ada is 36").await;

    let request = model.last_request();
    assert!(request.generation_config.response_schema.is_some());
    assert_eq!(
        request.generation_config.response_mime_type.as_deref(),
        Some("application/json")
    );
    let session = harness.session().await;
    assert_eq!(
        session.state.get("profile").unwrap(),
        &json!({"name": "Ada", "age": 36})
    );
}

#[tokio::test]
async fn streaming_partials_are_forwarded_but_not_committed() {
    let model = Arc::new(ScriptedLlm::new("scripted").streamed(&["Hel", "lo ", "there"]));
    let agent = LlmAgent::builder("talker")
        .model(model.clone())
        .output_key("greeting")
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let config = RunConfig::builder()
        .streaming_mode(StreamingMode::Sse)
        .build();
    let events = harness.send_content(Content::user("hi"), config).await;

    let partials: Vec<String> = events
        .iter()
        .filter(|e| e.partial)
        .map(|e| e.text())
        .collect();
    assert_eq!(partials, vec!["Hel", "lo ", "there"]);
    assert_eq!(texts(&events), vec!["Hello there"]);

    let session = harness.session().await;
    assert_eq!(session.events.len(), 2);
    assert_eq!(session.state.get("greeting").unwrap(), &json!("Hello there"));
}

#[tokio::test]
async fn model_errors_end_with_an_error_event() {
    let model = Arc::new(ScriptedLlm::new("scripted").turn(vec![LlmResponse {
        error_code: Some("SAFETY".into()),
        error_message: Some("blocked".into()),
        ..Default::default()
    }]));
    let agent = LlmAgent::builder("assistant")
        .model(model)
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let mut stream = harness.stream(Content::user("hi"), RunConfig::default());
    let error_event = stream.next().await.unwrap().unwrap();
    assert!(error_event.is_error());
    assert!(error_event.error_message.unwrap().contains("blocked"));
    assert!(matches!(stream.next().await, Some(Err(ArborError::Model(_)))));
    assert!(stream.next().await.is_none());

    // The error event is part of the history.
    let session = harness.session().await;
    assert!(session.events.last().unwrap().is_error());
}

#[tokio::test]
async fn agent_descriptions_and_kinds_are_exposed() {
    let agent = LlmAgent::builder("assistant")
        .description("General help")
        .model(Arc::new(ScriptedLlm::new("scripted")))
        .build()
        .unwrap();
    assert_eq!(agent.description(), "General help");
    assert_eq!(agent.kind().to_string(), "llm");
}

#[tokio::test]
async fn after_tool_sees_overridden_results() {
    let model = Arc::new(
        ScriptedLlm::new("scripted")
            .call("c1", "get_weather", json!({"city": "Oslo"}))
            .reply("ok"),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let after_calls = Arc::new(AtomicUsize::new(0));
    let counter = after_calls.clone();
    let agent = LlmAgent::builder("assistant")
        .model(model)
        .tool(weather_tool(seen.clone()))
        .before_tool(|_ctx, _invocation| {
            Box::pin(async { Ok(Some(json!({"forecast": "cached"}))) })
        })
        .after_tool(move |_ctx, outcome| {
            counter.fetch_add(1, Ordering::SeqCst);
            let forecast = outcome.response["forecast"].clone();
            Box::pin(async move { Ok(Some(json!({"seen": forecast}))) })
        })
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let events = harness.send("Oslo?").await;

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(after_calls.load(Ordering::SeqCst), 1);
    let response = &events[1].content.as_ref().unwrap().function_responses()[0].response;
    assert_eq!(response, &json!({"seen": "cached"}));
}

#[tokio::test]
async fn before_model_errors_abort_the_run() {
    let model = Arc::new(ScriptedLlm::new("scripted").reply("never sent"));
    let agent = LlmAgent::builder("assistant")
        .model(model.clone())
        .before_model(|_ctx, _request| {
            Box::pin(async { Err(ArborError::callback("before_model", "quota check failed")) })
        })
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let results = collect(harness.stream(Content::user("hi"), RunConfig::default())).await;

    assert_eq!(results.len(), 2);
    let error_event = results[0].as_ref().unwrap();
    assert_eq!(error_event.error_code.as_deref(), Some("CALLBACK_ERROR"));
    assert!(matches!(&results[1], Err(ArborError::Callback { hook: "before_model", .. })));
    assert_eq!(model.calls(), 0);
    let session = harness.session().await;
    assert!(session.events.last().unwrap().is_error());
}

#[tokio::test]
async fn after_tool_errors_are_not_swallowed() {
    let model = Arc::new(
        ScriptedLlm::new("scripted")
            .call("c1", "get_weather", json!({"city": "Lima"}))
            .reply("never sent"),
    );
    let agent = LlmAgent::builder("assistant")
        .model(model.clone())
        .tool(weather_tool(Arc::new(Mutex::new(Vec::new()))))
        .after_tool(|_ctx, outcome| {
            let name = outcome.name.clone();
            Box::pin(async move { Err(ArborError::callback("after_tool", format!("{name} rejected"))) })
        })
        .build()
        .unwrap();
    let harness = Harness::new(Arc::new(agent)).await;

    let results = collect(harness.stream(Content::user("Lima?"), RunConfig::default())).await;

    assert_eq!(results.len(), 3);
    assert!(results[0].as_ref().unwrap().has_function_calls());
    assert_eq!(
        results[1].as_ref().unwrap().error_code.as_deref(),
        Some("CALLBACK_ERROR")
    );
    assert!(matches!(
        &results[2],
        Err(ArborError::Callback { message, .. }) if message.contains("get_weather rejected")
    ));
    assert_eq!(model.calls(), 1);
    let session = harness.session().await;
    // user message, function call, error event
    assert_eq!(session.events.len(), 3);
}
