use crate::entities::serial::Serial;

/// Binds an external player identifier to its mobile. Looked up on every
/// request after authentication; no other per-connection state exists on
/// the server side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub player_id: u64,
    pub mobile: Serial,
    pub unlocked: u64,
}

impl Session {
    pub fn new(player_id: u64, mobile: Serial, unlocked: u64) -> Self {
        Self {
            player_id,
            mobile,
            unlocked,
        }
    }
}
