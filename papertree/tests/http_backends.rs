//! Wire behavior of the http generator and image client against a loopback
//! server that records every request.

use std::time::{Duration, Instant};

use serde_json::json;

use papertree::core::types::{GenerationParams, Message, Role};
use papertree::io::config::{GeneratorBackend, GeneratorConfig, ImageConfig};
use papertree::io::generator::{Generator, HttpGenerator};
use papertree::io::image::{Illustrator, ImageClient};
use papertree::test_support::{CannedResponse, LocalServer};

const UNSET_KEY_ENV: &str = "PAPERTREE_TEST_KEY_THAT_IS_NEVER_SET";

fn generator_config(server: &LocalServer) -> GeneratorConfig {
    GeneratorConfig {
        backend: GeneratorBackend::Http,
        api_base: format!("{}/v1/", server.base_url()),
        model: "chat-model".to_string(),
        api_key_env: UNSET_KEY_ENV.to_string(),
        ..GeneratorConfig::default()
    }
}

fn image_config(server: &LocalServer) -> ImageConfig {
    ImageConfig {
        api_base: server.base_url(),
        api_key_env: UNSET_KEY_ENV.to_string(),
        ..ImageConfig::default()
    }
}

fn chat_reply(content: &str) -> CannedResponse {
    CannedResponse::json(json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    }))
}

fn dialog() -> Vec<Message> {
    vec![Message::system("Be brief."), Message::user("Outline the paper.")]
}

#[test]
fn chat_posts_model_sampling_and_bearer() {
    let server = LocalServer::start(vec![chat_reply("{Introduction: hi}")]).expect("server");
    let generator = HttpGenerator::new(&generator_config(&server))
        .expect("generator")
        .with_api_key(Some("sk-test".to_string()));

    let reply = generator
        .chat(&dialog(), &GenerationParams::default())
        .expect("chat");

    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "{Introduction: hi}");
    let requests = server.finish().expect("server");
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/v1/chat/completions");
    assert_eq!(request.header("Authorization"), Some("Bearer sk-test"));
    let body = request.json().expect("json body");
    assert_eq!(body["model"], "chat-model");
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "Outline the paper.");
    assert_eq!(body["temperature"], 0.6);
    assert_eq!(body["top_p"], 0.9);
    assert_eq!(body["seed"], 1);
    assert!(body.get("max_tokens").is_none());
}

#[test]
fn chat_sends_max_tokens_and_no_auth_without_key() {
    let server = LocalServer::start(vec![chat_reply("ok")]).expect("server");
    let generator = HttpGenerator::new(&generator_config(&server))
        .expect("generator")
        .with_api_key(None);
    let params = GenerationParams {
        max_gen_len: Some(256),
        seed: 7,
        ..GenerationParams::default()
    };

    generator.chat(&dialog(), &params).expect("chat");

    let requests = server.finish().expect("server");
    assert!(requests[0].header("authorization").is_none());
    let body = requests[0].json().expect("json body");
    assert_eq!(body["max_tokens"], 256);
    assert_eq!(body["seed"], 7);
}

#[test]
fn chat_without_choices_is_an_error() {
    let response = CannedResponse::json(json!({"choices": []}));
    let server = LocalServer::start(vec![response]).expect("server");
    let generator = HttpGenerator::new(&generator_config(&server)).expect("generator");

    let err = generator
        .chat(&dialog(), &GenerationParams::default())
        .unwrap_err();

    assert_eq!(err.to_string(), "generator returned no choices");
    server.finish().expect("server");
}

#[test]
fn chat_failure_status_carries_body() {
    let response = CannedResponse::new(500, "model overloaded");
    let server = LocalServer::start(vec![response]).expect("server");
    let generator = HttpGenerator::new(&generator_config(&server)).expect("generator");

    let err = generator
        .chat(&dialog(), &GenerationParams::default())
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "generator request failed (500): model overloaded"
    );
    assert_eq!(server.finish().expect("server").len(), 1);
}

#[test]
fn chat_waits_for_a_slow_model_when_no_timeout_is_set() {
    let response = chat_reply("late but fine").delayed(Duration::from_secs(2));
    let server = LocalServer::start(vec![response]).expect("server");
    let generator = HttpGenerator::new(&generator_config(&server)).expect("generator");

    let reply = generator
        .chat(&dialog(), &GenerationParams::default())
        .expect("chat");

    assert_eq!(reply.content, "late but fine");
    server.finish().expect("server");
}

#[test]
fn chat_honors_configured_timeout() {
    let response = chat_reply("too late").delayed(Duration::from_secs(3));
    let server = LocalServer::start(vec![response]).expect("server");
    let config = GeneratorConfig {
        timeout_secs: Some(1),
        ..generator_config(&server)
    };
    let generator = HttpGenerator::new(&config).expect("generator");

    let started = Instant::now();
    let err = generator
        .chat(&dialog(), &GenerationParams::default())
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_millis(2500));
    assert!(err.to_string().contains("generator request failed"));
    server.finish().expect("server");
}

#[test]
fn image_request_uses_configured_model_size_and_quality() {
    let response = CannedResponse::json(json!({
        "created": 1,
        "data": [{"url": "https://images.test/methodology.png"}]
    }));
    let server = LocalServer::start(vec![response]).expect("server");
    let client = ImageClient::from_config(&image_config(&server))
        .expect("client")
        .with_api_key(Some("sk-image".to_string()));

    let url = client.generate("Draw the pipeline.").expect("generate");

    assert_eq!(url, "https://images.test/methodology.png");
    let requests = server.finish().expect("server");
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/images/generations");
    assert_eq!(request.header("authorization"), Some("Bearer sk-image"));
    let body = request.json().expect("json body");
    assert_eq!(body["model"], "dall-e-3");
    assert_eq!(body["size"], "1024x1024");
    assert_eq!(body["quality"], "standard");
    assert_eq!(body["n"], 1);
    assert_eq!(body["prompt"], "Draw the pipeline.");
}

#[test]
fn image_request_needs_an_api_key() {
    let server = LocalServer::start(Vec::new()).expect("server");
    let client = ImageClient::from_config(&image_config(&server))
        .expect("client")
        .with_api_key(None);

    let err = client.generate("Draw.").unwrap_err();

    assert_eq!(err.to_string(), "image api key not set");
    assert!(server.finish().expect("server").is_empty());
}

#[test]
fn image_response_without_url_is_an_error() {
    let responses = vec![
        CannedResponse::json(json!({"data": [{"revised_prompt": "Draw."}]})),
        CannedResponse::json(json!({"data": []})),
    ];
    let server = LocalServer::start(responses).expect("server");
    let client = ImageClient::from_config(&image_config(&server))
        .expect("client")
        .with_api_key(Some("sk-image".to_string()));

    for _ in 0..2 {
        let err = client.generate("Draw.").unwrap_err();
        assert_eq!(err.to_string(), "image response missing url");
    }
    assert_eq!(server.finish().expect("server").len(), 2);
}

#[test]
fn image_failure_status_carries_body() {
    let response = CannedResponse::new(400, "content policy violation");
    let server = LocalServer::start(vec![response]).expect("server");
    let client = ImageClient::from_config(&image_config(&server))
        .expect("client")
        .with_api_key(Some("sk-image".to_string()));

    let err = client.generate("Draw.").unwrap_err();

    assert_eq!(
        err.to_string(),
        "image request failed (400): content policy violation"
    );
    server.finish().expect("server");
}

#[test]
fn image_request_honors_configured_timeout() {
    let response = CannedResponse::json(json!({"data": []})).delayed(Duration::from_secs(3));
    let server = LocalServer::start(vec![response]).expect("server");
    let config = ImageConfig {
        timeout_secs: Some(1),
        ..image_config(&server)
    };
    let client = ImageClient::from_config(&config)
        .expect("client")
        .with_api_key(Some("sk-image".to_string()));

    let started = Instant::now();
    let err = client.generate("Draw.").unwrap_err();

    assert!(started.elapsed() < Duration::from_millis(2500));
    assert!(err.to_string().contains("image request failed"));
    server.finish().expect("server");
}
