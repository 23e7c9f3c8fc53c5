use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Boundary to the speech-to-text pipeline: an implementation captures audio
/// somewhere and pushes transcribed utterances into the channel. The session
/// loop treats each utterance exactly like a typed submission while speech
/// mode is on.
#[async_trait]
pub trait Transcriber: Send + Sync + 'static {
    async fn run(self: Box<Self>, sender: mpsc::Sender<String>);
}

/// Default transcriber: produces nothing but keeps the channel open for the
/// lifetime of the session, so enabling speech mode is harmless without a
/// capture backend.
pub struct SilentTranscriber;

#[async_trait]
impl Transcriber for SilentTranscriber {
    async fn run(self: Box<Self>, sender: mpsc::Sender<String>) {
        sender.closed().await;
    }
}

pub fn spawn_transcriber(
    transcriber: Box<dyn Transcriber>,
) -> (mpsc::Receiver<String>, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(16);
    let handle = tokio::spawn(async move {
        transcriber.run(sender).await;
    });
    (receiver, handle)
}
