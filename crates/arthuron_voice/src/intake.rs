use arthuron_core::{Command, FlushSignal, IntakeError, TextFragment};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Non-blocking front door of the relay.
///
/// Every accepted call enqueues exactly one [`Command`] on the single ordered
/// channel read by the relay worker. Calls never wait for the upstream
/// connection; a full queue is reported immediately as
/// [`IntakeError::ChannelFull`].
#[derive(Clone)]
pub struct TextIntake {
    tx: mpsc::Sender<Command>,
    /// Next sequence number. Held across `try_send` so numbering matches queue order.
    next_seq: Arc<Mutex<u64>>,
}

impl TextIntake {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self {
            tx,
            next_seq: Arc::new(Mutex::new(0)),
        }
    }

    /// Create an intake together with the receiving end of its command queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Queue a text fragment for synthesis. Empty text is rejected.
    pub fn submit(&self, text: impl Into<String>) -> Result<u64, IntakeError> {
        let text = text.into();
        if text.is_empty() {
            return Err(IntakeError::EmptyText);
        }
        self.enqueue(|seq| Command::Text(TextFragment { seq, text }))
    }

    /// Queue an end-of-utterance flush, whether or not any text is pending.
    pub fn flush(&self) -> Result<u64, IntakeError> {
        self.enqueue(|seq| Command::Flush(FlushSignal { seq }))
    }

    fn enqueue<F>(&self, build: F) -> Result<u64, IntakeError>
    where
        F: FnOnce(u64) -> Command,
    {
        let mut next_seq = self
            .next_seq
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let seq = *next_seq;
        match self.tx.try_send(build(seq)) {
            Ok(()) => {
                *next_seq += 1;
                Ok(seq)
            }
            Err(TrySendError::Full(cmd)) => {
                tracing::warn!(seq = cmd.seq(), "Relay command queue full, rejecting");
                Err(IntakeError::ChannelFull)
            }
            Err(TrySendError::Closed(_)) => Err(IntakeError::Closed),
        }
    }

    /// Whether the relay worker has stopped reading commands.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
