use std::sync::{Arc, Mutex, MutexGuard};

use super::stats::ConnectionState;
use crate::error::SessionError;
use crate::live::messages::RealtimeInput;
use crate::live::transport::OutboundLink;

#[derive(Debug, Default)]
struct ChannelSlot {
    state: ConnectionState,
    link: Option<OutboundLink>,
}

/// The single replaceable handle to the active connection
///
/// Every sender reads the current link through this cell instead of holding
/// its own copy, so attaching or detaching a connection is seen by all of
/// them at once. Only the session controller attaches, opens and detaches.
#[derive(Debug, Clone, Default)]
pub struct SessionChannel {
    slot: Arc<Mutex<ChannelSlot>>,
}

impl SessionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ChannelSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.lock().state = state;
    }

    /// Install the link of a freshly opened connection (not yet `Open`)
    pub(crate) fn attach(&self, link: OutboundLink) {
        self.lock().link = Some(link);
    }

    /// Remove the link and mark the channel closed
    pub(crate) fn detach(&self) -> Option<OutboundLink> {
        let mut slot = self.lock();
        slot.state = ConnectionState::Closed;
        slot.link.take()
    }

    /// Send realtime input; refused unless the channel is `Open`
    pub fn send(&self, input: RealtimeInput) -> Result<(), SessionError> {
        let link = {
            let slot = self.lock();
            if slot.state != ConnectionState::Open {
                return Err(SessionError::SendFailed(format!(
                    "channel is {:?}",
                    slot.state
                )));
            }
            slot.link.clone()
        };

        match link {
            Some(link) => link.send_realtime_input(input),
            None => Err(SessionError::SendFailed("no connection".to_string())),
        }
    }
}
