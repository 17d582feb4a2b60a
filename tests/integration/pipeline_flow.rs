//! End-to-end flow: ordering, filtering and recovery from engine failures.

use crate::helpers::{Harness, Script, is_turn_complete, texts};
use voice_assist::llm::Role;
use voice_assist::{AssistantError, PipelineEvent};

#[tokio::test]
async fn five_sentences_play_in_order() {
    let mut h = Harness::start(Script {
        transcripts: vec![Ok("Tell me five things.".into())],
        replies: vec![Ok(texts(&["One. Tw", "o! Three", "? Four. ", "Five"]))],
        ..Script::default()
    });

    h.speak();
    let events = h.wait_for(is_turn_complete).await;

    let expected = texts(&["One.", "Two!", "Three?", "Four.", "Five"]);
    let queued: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::SentenceQueued { text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(queued, expected);
    assert_eq!(h.synthesized(), expected);
    assert_eq!(h.played(), expected);

    let history = h.persisted();
    assert_eq!(
        history.last(),
        Some(&(Role::Assistant, "One. Two! Three? Four. Five".to_owned()))
    );
    h.join().await;
}

#[tokio::test]
async fn empty_transcript_never_reaches_dialogue() {
    let mut h = Harness::start(Script {
        transcripts: vec![Ok(String::new()), Ok("Hello there.".into())],
        replies: vec![Ok(texts(&["Hi."]))],
        ..Script::default()
    });

    h.speak();
    h.wait_for(|e| {
        matches!(
            e,
            PipelineEvent::SegmentDiscarded {
                reason: "empty transcript"
            }
        )
    })
    .await;
    assert_eq!(h.engine_calls(), 0);

    h.speak();
    h.wait_for(is_turn_complete).await;
    assert_eq!(h.engine_calls(), 1);
    assert_eq!(h.played(), texts(&["Hi."]));

    let users: Vec<String> = h
        .persisted()
        .into_iter()
        .filter(|(role, _)| *role == Role::User)
        .map(|(_, content)| content)
        .collect();
    assert_eq!(users, texts(&["Hello there."]));
    h.join().await;
}

#[tokio::test]
async fn engine_failures_drop_the_unit_and_continue() {
    let mut h = Harness::start(Script {
        transcripts: vec![
            Err(AssistantError::Stt("server down".into())),
            Ok("First question.".into()),
            Ok("Second question.".into()),
        ],
        replies: vec![
            Err(AssistantError::Llm("model crashed".into())),
            Ok(texts(&["Answer one. Bad sentence. Answer two."])),
        ],
        failing_sentences: texts(&["Bad sentence."]),
        ..Script::default()
    });

    // Transcription failure: the segment is dropped and capture resumes.
    h.speak();
    h.wait_for(|e| {
        matches!(
            e,
            PipelineEvent::SegmentDiscarded {
                reason: "transcription failed"
            }
        )
    })
    .await;

    // Dialogue failure: the turn ends without a reply.
    h.speak();
    h.wait_for(is_turn_complete).await;
    assert!(h.played().is_empty());

    // Synthesis failure: only the failing sentence is lost.
    h.speak();
    h.wait_for(is_turn_complete).await;
    assert_eq!(h.played(), texts(&["Answer one.", "Answer two."]));

    assert_eq!(
        h.persisted(),
        vec![
            (Role::System, "You are a test assistant.".to_owned()),
            (Role::User, "First question.".to_owned()),
            (Role::User, "Second question.".to_owned()),
            (
                Role::Assistant,
                "Answer one. Bad sentence. Answer two.".to_owned()
            ),
        ]
    );
    h.join().await;
}

#[tokio::test]
async fn speech_over_playback_carries_the_echo_and_is_not_answered() {
    let mut h = Harness::start(Script {
        transcripts: vec![Ok("Say two things.".into()), Ok("Mm hmm.".into())],
        replies: vec![Ok(texts(&["One. Two."]))],
        hold_first_playback: true,
        ..Script::default()
    });

    h.speak();
    h.wait_for(|e| matches!(e, PipelineEvent::PlaybackStarted { text } if text == "One."))
        .await;

    h.speak();
    let events = h
        .wait_for(|e| {
            matches!(
                e,
                PipelineEvent::SegmentDiscarded {
                    reason: "turn in progress"
                }
            )
        })
        .await;
    // The echo reference is the 160-sample response currently playing.
    assert!(events.contains(&PipelineEvent::SegmentCaptured {
        blocks: 13,
        overlapped_playback: true,
        echo_samples: 160,
    }));

    h.release_playback();
    h.wait_for(is_turn_complete).await;
    assert_eq!(h.played(), texts(&["One.", "Two."]));
    assert_eq!(h.engine_calls(), 1);
    let users: Vec<String> = h
        .persisted()
        .into_iter()
        .filter(|(role, _)| *role == Role::User)
        .map(|(_, content)| content)
        .collect();
    assert_eq!(users, texts(&["Say two things."]));
    h.join().await;
}
