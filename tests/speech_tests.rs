use std::time::Duration;

use vigil::output::{ProcessSpeech, SpeechSink};

// The playback program is `sleep`, so each "utterance" is its duration
// in seconds. Keeps the tests hermetic on any unix host.

#[tokio::test]
async fn sink_stays_busy_until_playback_finishes() {
    let sink = ProcessSpeech::spawn("sleep");

    sink.speak("0.3").await;
    // Immediately after speak the sink must report busy, even if the
    // worker has not yet picked the utterance up.
    assert!(!sink.wait_idle(Duration::from_millis(50)).await);
    assert!(sink.wait_idle(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn queued_utterances_keep_the_sink_busy() {
    let sink = ProcessSpeech::spawn("sleep");

    sink.speak("0.2").await;
    sink.speak("0.2").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    // First utterance is playing, second is queued: still busy.
    assert!(!sink.wait_idle(Duration::from_millis(10)).await);
    assert!(sink.wait_idle(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn cancel_stops_active_utterance_and_backlog() {
    let sink = ProcessSpeech::spawn("sleep");

    sink.speak("5").await;
    sink.speak("5").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    sink.cancel().await;

    assert!(sink.wait_idle(Duration::from_secs(2)).await);
}

#[tokio::test]
async fn blank_utterances_are_ignored() {
    let sink = ProcessSpeech::spawn("sleep");

    sink.speak("   ").await;
    assert!(sink.wait_idle(Duration::from_millis(100)).await);
}
