//! Integration test: stream a chat reply and a transcription through in-memory execution units.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::cell::RefCell;
use std::rc::Rc;

use candlelit_core::{
    ChatSession, Command, GenerationParams, JobController, JobError, JobKind, MemoryChannel,
    ParamValue, Progress, StatusMessage, default_model, transcribe,
};
use futures::executor::block_on;
use serde_json::json;

fn only_start(channel: &MemoryChannel) -> (u64, candlelit_core::JobRequest) {
    let mut sent = channel.take_sent();
    assert_eq!(sent.len(), 1, "expected exactly one command: {sent:?}");
    match sent.remove(0) {
        Command::Start {
            generation,
            request,
        } => (generation, request),
        Command::Abort => unreachable!(),
    }
}

fn fragment(generation: u64, text: &str) -> StatusMessage {
    StatusMessage::status("generating")
        .with_generation(generation)
        .with_sentence(text)
}

#[test]
fn fragments_stream_into_the_conversation() {
    let channel = MemoryChannel::new();
    let chat = ChatSession::new(channel.clone(), GenerationParams::default());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);

    let reply = chat.send("Say hello", move |p: &Progress| {
        sink.borrow_mut().push(p.label().to_owned());
    });
    let (generation, request) = only_start(&channel);
    assert_eq!(request.kind(), JobKind::TextGeneration);
    assert!(request.input_locator().ends_with("USER: Say hello\nASSISTANT: "));
    assert_eq!(
        request.parameters().get("maxSeqLen"),
        Some(&ParamValue::Number(200.0))
    );
    assert!(request.auxiliary_locators().contains_key("tokenizer"));

    channel.deliver(StatusMessage::status("loading").with_generation(generation));
    channel.deliver(fragment(generation, "Hello"));
    assert_eq!(chat.conversation().reply(), Some("Hello"));
    channel.deliver(fragment(generation, " world<|endoftext|>"));
    channel.deliver(
        StatusMessage::status("complete")
            .with_generation(generation)
            .with_output(json!("Hello world")),
    );

    let output = block_on(reply).unwrap().unwrap();
    assert_eq!(output.text, "Hello world");
    assert_eq!(chat.conversation().reply(), Some("Hello world"));
    assert_eq!(
        *seen.borrow(),
        vec!["loading", "generating", "generating"]
    );
}

#[test]
fn cancel_mid_stream_stops_fragments() {
    let channel = MemoryChannel::new();
    let chat = ChatSession::new(channel.clone(), GenerationParams::default());
    let reply = chat.send("Tell me a story", |_| {});
    let (generation, _) = only_start(&channel);

    channel.deliver(fragment(generation, "Once"));
    assert!(chat.abort());
    assert_eq!(channel.take_sent(), vec![Command::Abort]);
    channel.deliver(fragment(generation, " upon"));
    channel.deliver(StatusMessage::status("aborted").with_generation(generation));

    assert_eq!(block_on(reply).unwrap(), None);
    assert_eq!(chat.conversation().reply(), Some("Once"));
}

#[test]
fn second_message_supersedes_streaming_reply() {
    let channel = MemoryChannel::new();
    let chat = ChatSession::new(channel.clone(), GenerationParams::default());
    let first = chat.send("one", |_| {});
    let (first_generation, _) = only_start(&channel);
    channel.deliver(fragment(first_generation, "partial"));

    let second = chat.send("two", |_| {});
    let mut sent = channel.take_sent();
    assert_eq!(sent.remove(0), Command::Abort);
    let Command::Start { generation, request } = sent.remove(0) else {
        unreachable!()
    };
    assert!(request.input_locator().contains("ASSISTANT: partial\nUSER: two"));
    assert_eq!(block_on(first), Err(JobError::Superseded));

    channel.deliver(fragment(first_generation, " leaked"));
    channel.deliver(fragment(generation, "fresh"));
    channel.deliver(StatusMessage::status("complete").with_generation(generation));
    block_on(second).unwrap();
    assert_eq!(chat.conversation().reply(), Some("fresh"));
    assert!(
        chat.conversation()
            .messages()
            .iter()
            .all(|m| !m.text.contains("leaked"))
    );
}

#[test]
fn worker_error_is_reported() {
    let channel = MemoryChannel::new();
    let chat = ChatSession::new(channel.clone(), GenerationParams::default());
    let reply = chat.send("hi", |_| {});
    let (generation, _) = only_start(&channel);
    channel.deliver(StatusMessage::error("model not found").with_generation(generation));
    assert_eq!(
        block_on(reply),
        Err(JobError::Execution("model not found".into()))
    );
}

#[test]
fn transcription_joins_segments() {
    let channel = MemoryChannel::new();
    let controller = JobController::new(channel.clone());
    let model = default_model(JobKind::Transcription);
    let job = transcribe(&controller, model, "blob:audio", |_| {});

    let (generation, request) = only_start(&channel);
    assert_eq!(request.input_locator(), "blob:audio");
    assert!(request.auxiliary_locators().contains_key("melFilters"));

    channel.deliver(StatusMessage::status("decoding").with_generation(generation));
    channel.deliver(
        StatusMessage::status("complete")
            .with_generation(generation)
            .with_output(json!([
                {"start": 0.0, "duration": 30.0, "dr": {"text": "The quick brown fox"}},
                {"start": 30.0, "duration": 2.0, "dr": {"text": "jumps."}}
            ])),
    );
    let transcript = block_on(job).unwrap().unwrap();
    assert_eq!(transcript.text(), "The quick brown fox jumps.");
}
