//! Heart-beat negotiation.
//!
//! A `heart-beat: x,y` header advertises how often a party can emit bytes
//! (`x`) and how often it wants to receive them (`y`), both in milliseconds
//! with `0` meaning "none". The negotiated periods are:
//!
//! - `ping`: the server emits an EOL every `ping` ms,
//! - `pong`: the server expects client activity at least every `pong` ms and
//!   closes the connection after `2 * pong` ms of silence.

/// Parse a `heart-beat` header value. Absent or malformed values negotiate
/// as `0,0` (no heartbeats), matching the most permissive reading.
pub fn parse(header: Option<&str>) -> (u64, u64) {
    let Some(raw) = header else {
        return (0, 0);
    };
    let mut parts = raw.splitn(2, ',');
    let x = parts.next().and_then(|part| part.trim().parse().ok());
    let y = parts.next().and_then(|part| part.trim().parse().ok());
    match (x, y) {
        (Some(x), Some(y)) => (x, y),
        _ => (0, 0),
    }
}

/// Period at which the server sends PING frames, 0 to disable.
pub fn ping_period(client: (u64, u64), server: (u64, u64)) -> u64 {
    let (cx, _) = client;
    let (_, sy) = server;
    if cx == 0 || sy == 0 {
        0
    } else {
        cx.max(sy)
    }
}

/// Period within which the server expects client activity, 0 to disable.
pub fn pong_period(client: (u64, u64), server: (u64, u64)) -> u64 {
    let (_, cy) = client;
    let (sx, _) = server;
    if sx == 0 || cy == 0 {
        0
    } else {
        cy.max(sx)
    }
}

/// The `heart-beat` value advertised in the CONNECTED reply.
pub fn connected_header(ping: u64, pong: u64) -> String {
    format!("{ping},{pong}")
}
