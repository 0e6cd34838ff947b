//! MXP - rich markup (telnet option 91).
//!
//! After the option is negotiated the server sends the activation
//! subnegotiation and locks the client's parser in "locked" mode, so
//! ordinary text with raw `<` and `>` is never interpreted as tags.
//! Rich content is bracketed a line at a time with the `#M`...`#]`
//! markup escapes, which the renderer translates into the secure-line
//! and locked-line mode switches.

use telnet_negotiation::TelnetOption;
use telnet_negotiation::protocol::subnegotiate;

use crate::errors::MudResult;
use crate::session::Session;

/// Mode-line escapes (ESC [ <mode> z).
pub const LOCK_LOCKED: &[u8] = b"\x1b[7z";

/// Enable rich markup on a session: activation subnegotiation followed
/// by the locked-mode default. Idempotent.
pub fn start(session: &mut Session) -> MudResult<()> {
    if session.mxp_on {
        return Ok(());
    }
    session.write_raw_now(&subnegotiate(TelnetOption::Mxp.to_byte(), &[]))?;
    session.write_raw_now(LOCK_LOCKED)?;
    session.mxp_on = true;
    Ok(())
}

/// Disable rich markup (peer sent DONT, or the session is closing).
pub fn end(session: &mut Session) {
    session.mxp_on = false;
}
