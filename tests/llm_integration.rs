//! Integration tests for the collaborator client.
//!
//! These tests make real API calls to OpenRouter.
//! Run with: OPENROUTER_API_KEY=your_key cargo test --test llm_integration -- --ignored

use agent_replay::llm::{Collaborator, CompletionRequest, OpenRouterClient};

fn create_test_client() -> OpenRouterClient {
    let key = std::env::var("OPENROUTER_API_KEY")
        .expect("OPENROUTER_API_KEY environment variable must be set for integration tests");
    OpenRouterClient::new(key)
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn simple_completion() {
    let client = create_test_client();

    let request = CompletionRequest::new(
        "anthropic/claude-opus-4.5",
        "What is 2 + 2? Reply with just the number.",
    )
    .with_max_tokens(10);

    let response = client.complete(request).await;
    assert!(response.is_ok(), "Completion failed: {:?}", response.err());

    let content = response.expect("Should have content");
    assert!(
        content.contains('4'),
        "Response should contain '4', got: {content}"
    );
}

#[tokio::test]
#[ignore]
async fn json_selection_completion() {
    let client = create_test_client();

    let request = CompletionRequest::new(
        "anthropic/claude-opus-4.5",
        "Return ONLY this exact JSON object, no other text: {\"selected\": [1, 2]}",
    )
    .with_max_tokens(50);

    let content = client
        .complete(request)
        .await
        .expect("Should have content");

    let ids = agent_replay::llm::parse_selection_response(&content)
        .expect("Response should contain a parseable selection");
    assert_eq!(ids, vec![1, 2]);
}
