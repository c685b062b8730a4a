//! End-to-end reply generation.

use super::*;
use pretty_assertions::assert_eq;
use replicate_reply::{ChatTurn, ReplyRequest};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_reply_after_polling() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(create_path(PRIMARY)))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .and(body_partial_json(json!({
            "input": {
                "system_prompt": "You are a test assistant.",
                "prompt": "User: Hi\nAssistant: Hello!\nUser: Say hello\nAssistant:"
            }
        })))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(prediction(&server, "p1", "starting", Value::Null)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/predictions/p1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(prediction(&server, "p1", "processing", Value::Null)),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/predictions/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prediction(
            &server,
            "p1",
            "succeeded",
            json!(["Hello ", {"text": "world"}, "  \r\n\r\n\r\n"]),
        )))
        .with_priority(2)
        .mount(&server)
        .await;

    let request = ReplyRequest::builder()
        .system("You are a test assistant.")
        .turn(ChatTurn::user("Hi"))
        .turn(ChatTurn::assistant("Hello!"))
        .user("Say hello")
        .build()
        .unwrap();

    let reply = client(&server, fast_resilience())
        .generate_reply(request)
        .await
        .unwrap();

    assert_eq!(reply.backend_used, PRIMARY);
    assert_eq!(reply.text, "Hello world");
    assert_eq!(reply.input_tokens, Some(11));
    assert_eq!(reply.output_tokens, Some(3));
}

#[tokio::test]
async fn test_terminal_create_response_skips_polling() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(create_path(PRIMARY)))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "p1",
            "status": "succeeded",
            "output": "direct answer"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let reply = client(&server, fast_resilience())
        .generate_reply(hello())
        .await
        .unwrap();
    assert_eq!(reply.text, "direct answer");
    assert_eq!(reply.input_tokens, None);
}

#[tokio::test]
async fn test_requested_backend_is_used() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(create_path("anthropic/claude-3.5-haiku")))
        .respond_with(ResponseTemplate::new(201).set_body_json(prediction(
            &server,
            "p9",
            "succeeded",
            json!({"output_text": "  a\n\n\n\nb  "}),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let request = ReplyRequest::builder()
        .user("two paragraphs")
        .model("anthropic/claude-3.5-haiku")
        .build()
        .unwrap();

    let reply = client(&server, fast_resilience())
        .generate_reply(request)
        .await
        .unwrap();
    assert_eq!(reply.backend_used, "anthropic/claude-3.5-haiku");
    assert_eq!(reply.text, "a\n\nb");
}

#[tokio::test]
async fn test_unlisted_backend_never_touches_network() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let request = ReplyRequest::builder()
        .user("hi")
        .model("someone/unlisted-model")
        .build()
        .unwrap();

    let err = client(&server, fast_resilience())
        .generate_reply(request)
        .await
        .unwrap_err();
    assert!(matches!(err, replicate_reply::ReplicateError::Configuration { .. }));
}
