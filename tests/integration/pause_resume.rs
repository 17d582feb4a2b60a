//! Pause/resume: spoken and typed commands, flushing of queued work.

use crate::helpers::{Harness, Script, is_turn_complete, texts};
use voice_assist::llm::Role;
use voice_assist::{Command, PipelineEvent};

fn is_paused(e: &PipelineEvent) -> bool {
    matches!(e, PipelineEvent::Paused { .. })
}

fn is_resumed(e: &PipelineEvent) -> bool {
    matches!(e, PipelineEvent::Resumed)
}

#[tokio::test]
async fn spoken_stop_pauses_without_a_dialogue_turn() {
    let mut h = Harness::start(Script {
        transcripts: vec![
            Ok("Stop.".into()),
            Ok(" START. ".into()),
            Ok("How are you?".into()),
        ],
        replies: vec![Ok(texts(&["Fine, thanks."]))],
        ..Script::default()
    });

    h.speak();
    let events = h.wait_for(is_paused).await;
    assert!(events.contains(&PipelineEvent::CommandHeard {
        text: "Stop.".into()
    }));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, PipelineEvent::Transcribed { .. }))
    );
    assert_eq!(h.engine_calls(), 0);

    h.speak();
    h.wait_for(is_resumed).await;

    h.speak();
    h.wait_for(is_turn_complete).await;
    assert_eq!(h.played(), texts(&["Fine, thanks."]));

    let seen = h.last_history_seen();
    assert!(
        seen.iter()
            .all(|m| !m.content.to_lowercase().contains("stop.")
                && !m.content.to_lowercase().contains("start."))
    );
    let users: Vec<String> = h
        .persisted()
        .into_iter()
        .filter(|(role, _)| *role == Role::User)
        .map(|(_, content)| content)
        .collect();
    assert_eq!(users, texts(&["How are you?"]));
    h.join().await;
}

#[tokio::test]
async fn pause_discards_queued_replies_and_resume_plays_only_new_ones() {
    let mut h = Harness::start(Script {
        transcripts: vec![Ok("Count to five.".into()), Ok("Again.".into())],
        replies: vec![
            Ok(texts(&["One. Two. Three. Four. Five."])),
            Ok(texts(&["Fresh start."])),
        ],
        hold_first_playback: true,
        ..Script::default()
    });

    h.speak();
    h.wait_for(|e| matches!(e, PipelineEvent::PlaybackStarted { text } if text == "One."))
        .await;
    h.wait_until("all five sentences are synthesized", |h| {
        h.synthesized().len() == 5
    })
    .await;

    h.type_command(Command::Stop).await;
    let events = h.wait_for(is_paused).await;
    let Some(PipelineEvent::Paused { drained }) = events.last() else {
        panic!("expected a pause event, got {events:?}");
    };
    assert!(*drained >= 4, "queued audio should be flushed, drained {drained}");

    // The sentence already playing finishes; nothing queued follows it.
    h.release_playback();
    h.type_command(Command::Start).await;
    h.wait_for(is_resumed).await;

    h.speak();
    let events = h.wait_for(is_turn_complete).await;
    assert!(events.contains(&PipelineEvent::PlaybackStarted {
        text: "Fresh start.".into()
    }));
    assert_eq!(h.played(), texts(&["One.", "Fresh start."]));
    h.join().await;
}

#[tokio::test]
async fn speech_while_paused_is_not_answered() {
    let mut h = Harness::start(Script {
        transcripts: vec![Ok("Are you there?".into()), Ok("Now?".into())],
        replies: vec![Ok(texts(&["Yes."]))],
        ..Script::default()
    });

    h.type_command(Command::Stop).await;
    h.wait_for(is_paused).await;

    h.speak();
    h.wait_for(|e| matches!(e, PipelineEvent::SegmentDiscarded { reason: "paused" }))
        .await;
    assert_eq!(h.engine_calls(), 0);

    h.type_command(Command::Start).await;
    h.wait_for(is_resumed).await;
    h.speak();
    h.wait_for(is_turn_complete).await;

    assert_eq!(h.engine_calls(), 1);
    assert_eq!(h.played(), texts(&["Yes."]));
    h.join().await;
}

#[tokio::test]
async fn spoken_stop_interrupts_a_reply_in_progress() {
    let mut h = Harness::start(Script {
        transcripts: vec![
            Ok("Count to three.".into()),
            Ok("Stop.".into()),
            Ok("Anything else?".into()),
        ],
        replies: vec![Ok(texts(&["One. Two. Three."])), Ok(texts(&["No."]))],
        hold_first_playback: true,
        ..Script::default()
    });

    h.speak();
    h.wait_for(|e| matches!(e, PipelineEvent::PlaybackStarted { text } if text == "One."))
        .await;

    h.speak();
    let events = h.wait_for(is_paused).await;
    assert!(events.contains(&PipelineEvent::CommandHeard {
        text: "Stop.".into()
    }));

    h.release_playback();
    h.wait_until("the interrupted sentence finishes", |h| {
        h.played().len() == 1
    })
    .await;
    h.type_command(Command::Start).await;
    h.wait_for(is_resumed).await;

    h.speak();
    h.wait_for(is_turn_complete).await;
    assert_eq!(h.played(), texts(&["One.", "No."]));
    assert_eq!(h.engine_calls(), 2);
    h.join().await;
}
