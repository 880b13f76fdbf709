//! Roster updates for dispatchers.

use relay_protocol::Frame;
use tracing::{debug, trace, warn};

use crate::registry::ConnectionRegistry;

/// Sends the current roster to every registered dispatcher.
///
/// Without dispatchers this does nothing; rosters are never buffered for
/// later delivery. Returns the number of dispatchers reached.
pub(crate) fn broadcast(registry: &ConnectionRegistry) -> usize {
    if registry.dispatchers().next().is_none() {
        trace!("no dispatchers registered, skipping roster broadcast");
        return 0;
    }

    let frame = Frame::client_list(registry.roster());
    let json = match frame.encode() {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to encode roster: {e}");
            return 0;
        }
    };

    let mut reached = 0;
    for conn in registry.dispatchers() {
        if conn.sender().send_text(json.clone()).is_ok() {
            reached += 1;
        }
    }
    debug!(clients = registry.len(), dispatchers = reached, "roster broadcast");
    reached
}
