//! The speech side-channel sink.
//!
//! Flushed sentence units and the engagement hook go here, best-effort: a
//! slow or absent consumer must never stall the primary event stream, so
//! delivery uses a bounded channel and drops on backpressure with a warning.

use tokio::sync::mpsc;
use tracing::warn;

/// What the side-channel consumer receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechSignal {
    /// A sentence-sized unit of flushed text.
    Utterance(String),
    /// The agent began producing internal reasoning; fires once per
    /// interaction so an avatar can switch to a "thinking" pose.
    ThinkingStarted,
}

/// Consumer of flushed side-channel output.
pub trait SpeechSink: Send + Sync {
    fn on_flush(&self, text: &str);
    fn on_thinking_started(&self);
}

/// Sink for deployments without a speech consumer.
pub struct NoopSpeechSink;

impl SpeechSink for NoopSpeechSink {
    fn on_flush(&self, _text: &str) {}
    fn on_thinking_started(&self) {}
}

/// Forwards signals over a bounded channel to a consumer task.
pub struct ChannelSpeechSink {
    tx: mpsc::Sender<SpeechSignal>,
}

impl ChannelSpeechSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SpeechSignal>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl SpeechSink for ChannelSpeechSink {
    fn on_flush(&self, text: &str) {
        if self
            .tx
            .try_send(SpeechSignal::Utterance(text.to_string()))
            .is_err()
        {
            warn!(len = text.len(), "Speech channel full, dropping utterance");
        }
    }

    fn on_thinking_started(&self) {
        if self.tx.try_send(SpeechSignal::ThinkingStarted).is_err() {
            warn!("Speech channel full, dropping thinking signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSpeechSink::new(4);
        sink.on_thinking_started();
        sink.on_flush("First sentence.\n");

        assert_eq!(rx.try_recv().unwrap(), SpeechSignal::ThinkingStarted);
        assert_eq!(
            rx.try_recv().unwrap(),
            SpeechSignal::Utterance("First sentence.\n".to_string())
        );
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = ChannelSpeechSink::new(1);
        sink.on_flush("kept");
        sink.on_flush("dropped");

        assert_eq!(
            rx.try_recv().unwrap(),
            SpeechSignal::Utterance("kept".to_string())
        );
        assert!(rx.try_recv().is_err());
    }
}
