//! Reader and writer state enums.

/// Position of a batch reader in the payload.
///
/// ```text
/// Initial ──▶ Operation ◀──────────────┐
///    │            │                    │
///    ▼            ▼                    │
/// ChangesetStart ──▶ Operation ──▶ ChangesetEnd
///                                      │
///                  any ──▶ Completed ◀─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchReaderState {
    /// Nothing has been read yet.
    Initial,
    /// An operation's headers have been read; its message can be created.
    Operation,
    /// A changeset (atomicity group) was entered.
    ChangesetStart,
    /// The current changeset was closed.
    ChangesetEnd,
    /// The end of the batch was reached. Terminal.
    Completed,
    /// An error stopped the reader. Terminal.
    Exception,
}

impl BatchReaderState {
    /// Returns `true` once the reader cannot make further progress.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchReaderState::Completed | BatchReaderState::Exception)
    }
}

/// Position of a batch writer in the payload it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterState {
    Start,
    BatchStarted,
    ChangesetStarted,
    OperationCreated,
    ChangesetCompleted,
    BatchCompleted,
    Error,
}

/// Whether a payload carries requests or responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Response,
}
