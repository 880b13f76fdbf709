//! Cross-role fan-out of application messages.

use relay_protocol::{ClientRole, Frame};
use tracing::{trace, warn};

use crate::registry::ConnectionRegistry;

/// Delivers `frame` to every registered connection of the role opposite
/// `origin`. Closed or full transports are skipped; nothing is queued or
/// retried. Returns the number of successful deliveries.
pub(crate) fn route(registry: &ConnectionRegistry, origin: ClientRole, frame: &Frame) -> usize {
    let json = match frame.encode() {
        Ok(json) => json,
        Err(e) => {
            warn!("dropping unencodable frame: {e}");
            return 0;
        }
    };

    let target = origin.peer();
    let mut delivered = 0;
    for conn in registry.iter().filter(|c| c.role == target) {
        if !conn.sender().is_connected() {
            continue;
        }
        match conn.sender().send_text(json.clone()) {
            Ok(()) => delivered += 1,
            Err(_) => trace!(client_id = %conn.id, "target not writable, message dropped"),
        }
    }
    delivered
}
