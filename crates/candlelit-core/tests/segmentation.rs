//! Integration test: drive a segmentation session against an in-memory execution unit.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use candlelit_core::{
    Command, JobError, JobKind, Mask, MaskRef, MemoryChannel, PointMode, SegmentUpdate,
    SegmentationSession, SegmenterConfig, StatusMessage, lookup,
};
use futures::executor::block_on;
use image::{GrayImage, Luma, Rgba, RgbaImage};
use serde_json::json;

const CANVAS: f64 = 512.0;

fn starts(sent: &[Command]) -> Vec<&Command> {
    sent.iter()
        .filter(|c| matches!(c, Command::Start { .. }))
        .collect()
}

fn generation_of(command: &Command) -> u64 {
    match command {
        Command::Start { generation, .. } => *generation,
        Command::Abort => 0,
    }
}

fn last_start(channel: &MemoryChannel) -> Command {
    let sent = channel.take_sent();
    starts(&sent).last().copied().cloned().unwrap()
}

/// Load an image and finish its embedding.
fn ready_session() -> (SegmentationSession<MemoryChannel>, MemoryChannel) {
    let channel = MemoryChannel::new();
    let session = SegmentationSession::new(channel.clone(), SegmenterConfig::default());
    let loading = session.load_image("blob:photo", |_| {});
    let embed = last_start(&channel);
    channel.deliver(StatusMessage::status("embedding").with_generation(generation_of(&embed)));
    channel.deliver(
        StatusMessage::status("complete-embedding").with_generation(generation_of(&embed)),
    );
    assert_eq!(block_on(loading).unwrap(), SegmentUpdate::EmbeddingReady);
    (session, channel)
}

#[test]
fn embedding_gates_point_queries() {
    let channel = MemoryChannel::new();
    let session = SegmentationSession::new(channel.clone(), SegmenterConfig::default());

    let loading = session.load_image("blob:photo", |_| {});
    let embed = last_start(&channel);
    let Command::Start { request, .. } = &embed else {
        unreachable!()
    };
    assert!(request.is_embedding_only());

    // Clicking before completeEmbedding sends nothing and changes nothing.
    let early = block_on(session.click(0.5, 0.5, CANVAS, |_| {})).unwrap();
    assert_eq!(early, SegmentUpdate::Blocked);
    assert_eq!(channel.pending(), 0);
    assert!(session.segmenter().points().is_empty());

    channel.deliver(StatusMessage::status("completeEmbedding").with_generation(generation_of(&embed)));
    assert_eq!(block_on(loading).unwrap(), SegmentUpdate::EmbeddingReady);
    assert!(session.segmenter().is_ready());
}

#[test]
fn click_query_mask_then_unclick_clears() {
    let (session, channel) = ready_session();

    let query = session.click(0.5, 0.5, CANVAS, |_| {});
    let sent = channel.take_sent();
    let started = starts(&sent);
    assert_eq!(started.len(), 1);
    let Command::Start {
        generation,
        request,
    } = started[0]
    else {
        unreachable!()
    };
    let points = request.points().unwrap();
    assert_eq!(points.len(), 1);
    assert!(points.points()[0].is_foreground);

    channel.deliver(
        StatusMessage::status("complete")
            .with_generation(*generation)
            .with_output(json!({"maskURL": "blob:mask-1"})),
    );
    assert_eq!(
        block_on(query).unwrap(),
        SegmentUpdate::Mask(MaskRef::new("blob:mask-1"))
    );

    // Render the overlay with the returned mask: fill plus one marker.
    let image = RgbaImage::from_pixel(64, 64, Rgba([10, 10, 10, 255]));
    let mask = Mask::new(GrayImage::from_fn(64, 64, |x, _| {
        Luma([if x < 40 { 255 } else { 0 }])
    }))
    .unwrap();
    let rendered = session.overlay(&image, Some(&mask));
    let config = SegmenterConfig::default();
    assert_eq!(rendered.get_pixel(32, 32).0, config.foreground_marker);
    assert!(rendered.get_pixel(5, 5).0[0] > 10);
    assert_eq!(rendered.get_pixel(60, 5).0, [10, 10, 10, 255]);

    // Clicking the same spot removes the only point: no request, mask gone.
    let cleared = block_on(session.click(0.5, 0.5, CANVAS, |_| {})).unwrap();
    assert_eq!(cleared, SegmentUpdate::MaskCleared);
    assert!(starts(&channel.take_sent()).is_empty());
    assert_eq!(session.segmenter().mask(), None);
}

#[test]
fn newer_click_supersedes_pending_query() {
    let (session, channel) = ready_session();

    let first = session.click(0.2, 0.2, CANVAS, |_| {});
    let second = session.click(0.8, 0.8, CANVAS, |_| {});
    let sent = channel.take_sent();
    assert!(matches!(sent[1], Command::Abort));
    let newest = generation_of(starts(&sent)[1]);

    assert_eq!(block_on(first).unwrap(), SegmentUpdate::Discarded);

    // The unit answers the superseded query late, then the current one.
    channel.deliver(
        StatusMessage::status("complete")
            .with_generation(newest - 1)
            .with_output(json!({"maskURL": "blob:stale"})),
    );
    channel.deliver(
        StatusMessage::status("complete")
            .with_generation(newest)
            .with_output(json!({"maskURL": "blob:fresh"})),
    );
    assert_eq!(
        block_on(second).unwrap(),
        SegmentUpdate::Mask(MaskRef::new("blob:fresh"))
    );
    assert_eq!(session.segmenter().points().len(), 2);
}

#[test]
fn background_points_after_toggle() {
    let (session, channel) = ready_session();
    assert_eq!(session.toggle_point_mode(), PointMode::Background);

    let _query = session.click(0.3, 0.3, CANVAS, |_| {});
    let Command::Start { request, .. } = last_start(&channel) else {
        unreachable!()
    };
    assert!(!request.points().unwrap().points()[0].is_foreground);
}

#[test]
fn query_error_surfaces_verbatim() {
    let (session, channel) = ready_session();
    let query = session.click(0.5, 0.5, CANVAS, |_| {});
    let generation = generation_of(&last_start(&channel));
    channel.deliver(StatusMessage::error("decoder exploded").with_generation(generation));
    let error = block_on(query).unwrap_err();
    assert_eq!(error, JobError::Execution("decoder exploded".into()));
    assert_eq!(error.to_string(), "decoder exploded");
}

#[test]
fn model_switch_reembeds_and_requeries_points() {
    let (session, channel) = ready_session();
    let query = session.click(0.5, 0.5, CANVAS, |_| {});
    let generation = generation_of(&last_start(&channel));
    channel.deliver(
        StatusMessage::status("complete")
            .with_generation(generation)
            .with_output(json!({"maskURL": "blob:tiny"})),
    );
    block_on(query).unwrap();

    let switching = session.set_model(lookup(JobKind::Segmentation, "sam_base").unwrap(), |_| {});
    let embed = last_start(&channel);
    let Command::Start { request, .. } = &embed else {
        unreachable!()
    };
    assert!(request.is_embedding_only());
    assert_eq!(request.model_id(), "sam_base");
    assert!(!session.segmenter().is_ready());

    channel.deliver(StatusMessage::status("complete-embedding").with_generation(generation_of(&embed)));

    // The re-query goes out when the embedding future resumes.
    let mut switching = Box::pin(switching);
    assert!(futures::FutureExt::now_or_never(&mut switching).is_none());
    let Command::Start { request, .. } = last_start(&channel) else {
        unreachable!()
    };
    assert_eq!(request.model_id(), "sam_base");
    assert_eq!(request.points().unwrap().len(), 1);
    channel.deliver(
        StatusMessage::status("complete")
            .with_generation(generation_of(&embed) + 1)
            .with_output(json!({"maskURL": "blob:base"})),
    );
    assert_eq!(
        block_on(switching).unwrap(),
        SegmentUpdate::Mask(MaskRef::new("blob:base"))
    );
}

#[test]
fn clear_cancels_and_resets() {
    let (session, channel) = ready_session();
    let query = session.click(0.5, 0.5, CANVAS, |_| {});
    channel.take_sent();
    session.clear();
    assert_eq!(channel.take_sent(), vec![Command::Abort]);
    assert_eq!(block_on(query).unwrap(), SegmentUpdate::Aborted);
    assert_eq!(session.segmenter().image(), None);
    assert_eq!(
        block_on(session.click(0.5, 0.5, CANVAS, |_| {})).unwrap(),
        SegmentUpdate::Blocked
    );
}

#[test]
fn aborted_embedding_can_be_retried() {
    let channel = MemoryChannel::new();
    let session = SegmentationSession::new(channel.clone(), SegmenterConfig::default());
    let loading = session.load_image("blob:photo", |_| {});
    assert!(session.abort());
    assert_eq!(block_on(loading).unwrap(), SegmentUpdate::Aborted);
    channel.take_sent();

    let retry = session.retry_embedding(|_| {});
    let embed = last_start(&channel);
    channel.deliver(StatusMessage::status("completeEmbedding").with_generation(generation_of(&embed)));
    assert_eq!(block_on(retry).unwrap(), SegmentUpdate::EmbeddingReady);
}
