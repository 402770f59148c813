/// Where a fetch currently is in its pipeline.
/// Loosely follows net/base/load_states.h, reduced to the stages a fetch
/// passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// The fetch has not started.
    #[default]
    Idle,

    /// Resolving a non-network scheme (data:, blob:).
    ResolvingScheme,

    /// Handing the request to the dispatcher.
    SendingRequest,

    /// Waiting for the response head (TTFB).
    WaitingForResponse,

    /// A redirect is being followed.
    Redirecting,

    /// Reading the response body.
    ReadingResponse,

    /// The fetch reached a final state.
    Done,
}

impl LoadState {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => LoadState::ResolvingScheme,
            2 => LoadState::SendingRequest,
            3 => LoadState::WaitingForResponse,
            4 => LoadState::Redirecting,
            5 => LoadState::ReadingResponse,
            6 => LoadState::Done,
            _ => LoadState::Idle,
        }
    }
}
