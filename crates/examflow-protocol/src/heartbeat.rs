//! Heart-beat negotiation (STOMP 1.2 §"Heart-beating").

use std::time::Duration;

use crate::error::{ProtocolError, ProtocolResult};

/// Missed intervals tolerated before the peer is considered gone.
pub const GRACE_FACTOR: u32 = 2;

/// One side's heart-beat offer.
///
/// `outgoing` is how often this side can send, `incoming` how often it wants
/// to receive. Zero means "cannot" / "does not want".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartBeat {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl HeartBeat {
    /// No heart-beating in either direction.
    pub const DISABLED: HeartBeat = HeartBeat {
        outgoing: Duration::ZERO,
        incoming: Duration::ZERO,
    };

    /// Creates an offer.
    pub fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    /// Formats the offer as a `heart-beat` header value.
    pub fn to_header(&self) -> String {
        format!(
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }

    /// Parses a `heart-beat` header value.
    pub fn parse(value: &str) -> ProtocolResult<Self> {
        let invalid = || ProtocolError::InvalidHeartBeat(value.to_string());
        let (outgoing, incoming) = value.split_once(',').ok_or_else(invalid)?;
        let outgoing: u64 = outgoing.trim().parse().map_err(|_| invalid())?;
        let incoming: u64 = incoming.trim().parse().map_err(|_| invalid())?;
        Ok(Self::new(
            Duration::from_millis(outgoing),
            Duration::from_millis(incoming),
        ))
    }
}

impl Default for HeartBeat {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(10))
    }
}

/// Heart-beat schedule agreed for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    /// Send an EOL when nothing else was sent for this long.
    pub send_every: Option<Duration>,
    /// The server promised to send something at least this often.
    pub expect_every: Option<Duration>,
}

impl Negotiated {
    /// Silence after which the connection is declared dead.
    pub fn silence_limit(&self) -> Option<Duration> {
        self.expect_every.map(|every| every * GRACE_FACTOR)
    }
}

/// Combines the client offer with the server's CONNECTED `heart-beat` header.
///
/// A missing header means the server does not heart-beat.
pub fn negotiate(client: HeartBeat, server_header: Option<&str>) -> ProtocolResult<Negotiated> {
    let server = match server_header {
        Some(value) => HeartBeat::parse(value)?,
        None => HeartBeat::DISABLED,
    };

    Ok(Negotiated {
        send_every: pick(client.outgoing, server.incoming),
        expect_every: pick(client.incoming, server.outgoing),
    })
}

fn pick(ours: Duration, theirs: Duration) -> Option<Duration> {
    if ours.is_zero() || theirs.is_zero() {
        None
    } else {
        Some(ours.max(theirs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_offer_header() {
        assert_eq!(HeartBeat::default().to_header(), "10000,10000");
    }

    #[test]
    fn takes_the_slower_side() {
        let agreed = negotiate(HeartBeat::default(), Some("20000,5000")).unwrap();
        assert_eq!(agreed.send_every, Some(Duration::from_secs(10)));
        assert_eq!(agreed.expect_every, Some(Duration::from_secs(20)));
        assert_eq!(agreed.silence_limit(), Some(Duration::from_secs(40)));
    }

    #[test]
    fn zero_on_either_side_disables_direction() {
        let agreed = negotiate(HeartBeat::default(), Some("0,10000")).unwrap();
        assert_eq!(agreed.send_every, Some(Duration::from_secs(10)));
        assert_eq!(agreed.expect_every, None);

        let none = negotiate(HeartBeat::DISABLED, Some("10000,10000")).unwrap();
        assert_eq!(none, Negotiated::default());
    }

    #[test]
    fn missing_server_header_disables_heart_beats() {
        let agreed = negotiate(HeartBeat::default(), None).unwrap();
        assert_eq!(agreed, Negotiated::default());
    }

    #[test]
    fn rejects_garbage() {
        assert!(HeartBeat::parse("ten,ten").is_err());
        assert!(HeartBeat::parse("10000").is_err());
    }
}
