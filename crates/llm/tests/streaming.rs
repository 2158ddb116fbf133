//! Streaming state-machine behavior against mock SSE backends: deadlines,
//! the process-wide pause flag, and truncated-frame retry.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::post;
use futures::StreamExt;
use llm::provider::Provider;
use llm::provider::anthropic::AnthropicProvider;
use llm::registry::ModelRegistry;
use llm::request::{ProviderRequest, RequestContext};
use llm::{Message, StreamEvent};
use secrecy::SecretString;
use tokio::net::TcpListener;

async fn spawn_sse_server<F, S>(make_body: F) -> String
where
    F: Fn() -> S + Clone + Send + Sync + 'static,
    S: futures::Stream<Item = Result<String, std::io::Error>> + Send + 'static,
{
    let app = Router::new().route(
        "/v1/messages",
        post(move || {
            let make_body = make_body.clone();
            async move {
                (
                    StatusCode::OK,
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    Body::from_stream(make_body()),
                )
                    .into_response()
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{address}/v1")
}

fn provider(base_url: String) -> AnthropicProvider {
    AnthropicProvider::new(
        Arc::new(ModelRegistry::builtin()),
        SecretString::from("sk-ant-test".to_string()),
    )
    .unwrap()
    .with_base_url(base_url)
}

fn frame(data: &str) -> String {
    format!("data: {data}\n\n")
}

#[tokio::test]
async fn deadline_expiry_behaves_like_cancellation_with_timeout() {
    let base_url = spawn_sse_server(|| {
        futures::stream::iter(vec![
            Ok(frame(r#"{"type":"message_start","message":{"id":"msg_t","usage":{"input_tokens":3}}}"#)),
            Ok(frame(
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            )),
            Ok(frame(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"part"}}"#,
            )),
        ])
        // Then stall far beyond the deadline.
        .chain(futures::stream::once(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(frame(r#"{"type":"message_stop"}"#))
        }))
    })
    .await;

    let context = RequestContext {
        deadline: Some(tokio::time::Instant::now() + Duration::from_millis(300)),
        ..RequestContext::default()
    };

    let request = ProviderRequest::new("claude-sonnet-4-0", vec![Message::user("hi")]);
    let events: Vec<StreamEvent> = provider(base_url)
        .stream(request, &context)
        .await
        .unwrap()
        .collect()
        .await;

    assert!(
        events
            .iter()
            .any(|e| matches!(e, StreamEvent::Error { error, .. } if error == "timeout"))
    );

    // Partial text still completes, and exactly one end closes the stream.
    assert!(
        events
            .iter()
            .any(|e| matches!(e, StreamEvent::MessageComplete { content, .. } if content == "part"))
    );
    assert_eq!(events.iter().filter(|e| e.is_end()).count(), 1);
    assert!(matches!(events.last(), Some(StreamEvent::StreamEnd {})));
}

#[tokio::test]
async fn pause_flag_stops_consumption_with_a_paused_delta() {
    let base_url = spawn_sse_server(|| {
        futures::stream::iter(vec![
            Ok(frame(r#"{"type":"message_start","message":{"id":"msg_p","usage":{"input_tokens":2}}}"#)),
            Ok(frame(
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            )),
            Ok(frame(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"before pause"}}"#,
            )),
        ])
        .chain(futures::stream::once(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(frame(r#"{"type":"message_stop"}"#))
        }))
    })
    .await;

    let context = RequestContext::default();
    let pause = context.pause.clone();

    let request = ProviderRequest::new("claude-sonnet-4-0", vec![Message::user("hi")]);
    let mut stream = provider(base_url).stream(request, &context).await.unwrap();

    // Consume until the first text delta arrives, then pause the world.
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        let is_delta = matches!(&event, StreamEvent::MessageDelta { .. });
        events.push(event);
        if is_delta {
            pause.pause();
        }
    }

    let paused_delta = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::MessageDelta { content, .. } => Some(content.clone()),
            _ => None,
        })
        .last()
        .unwrap();
    assert!(paused_delta.contains("[paused]"));

    assert!(
        events
            .iter()
            .any(|e| matches!(e, StreamEvent::MessageComplete { content, .. } if content.contains("before pause")))
    );
    assert_eq!(events.iter().filter(|e| e.is_end()).count(), 1);
    assert!(matches!(events.last(), Some(StreamEvent::StreamEnd {})));
}

#[tokio::test]
async fn truncated_frame_is_retried_with_the_next_frames_bytes() {
    // One JSON document split across two SSE frames: the first is
    // structurally unterminated, the driver buffers it and retries with
    // the second frame's data appended.
    let base_url = spawn_sse_server(|| {
        futures::stream::iter(vec![
            Ok(frame(r#"{"type":"message_start","message":{"id":"msg_r","usage":{"input_tokens":4}}}"#)),
            Ok(frame(
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            )),
            Ok(frame(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"reassemb"#,
            )),
            Ok(frame(r#"led"}}"#)),
            Ok(frame(
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#,
            )),
            Ok(frame(r#"{"type":"message_stop"}"#)),
        ])
    })
    .await;

    let request = ProviderRequest::new("claude-sonnet-4-0", vec![Message::user("hi")]);
    let events: Vec<StreamEvent> = provider(base_url)
        .stream(request, &RequestContext::default())
        .await
        .unwrap()
        .collect()
        .await;

    let complete = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::MessageComplete { content, .. } => Some(content.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(complete, "reassembled");

    // No error event: the retry absorbed the hazard.
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
    assert!(matches!(events.last(), Some(StreamEvent::StreamEnd {})));
}
