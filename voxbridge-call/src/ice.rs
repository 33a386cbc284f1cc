//! Remote ICE candidate parsing.

use std::fmt;

use crate::error::{CallError, Result};
use crate::signaling::RtcIceMessage;

/// A remote ICE candidate, parsed from its `candidate:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    /// Foundation (the part after `candidate:`).
    pub foundation: String,
    /// Component id (1 = RTP, 2 = RTCP).
    pub component: u16,
    /// Transport protocol, e.g. `udp`.
    pub protocol: String,
    /// Candidate priority.
    pub priority: u32,
    /// Connection address: an IP literal or an mDNS hostname
    /// (`<uuid>.local`), as browsers emit for host candidates.
    pub ip: String,
    /// Connection port.
    pub port: u16,
    /// Candidate type: `host`, `srflx`, `prflx` or `relay`.
    pub candidate_type: String,
    /// Media stream id.
    pub sdp_mid: Option<String>,
    /// Media line index.
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// Parse a candidate line of the form
    /// `candidate:<foundation> <component> <protocol> <priority> <ip> <port> typ <type> ...`.
    ///
    /// Trailing attributes (`raddr`, `generation`, ...) are ignored.
    pub fn parse(
        line: &str,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            return Err(CallError::candidate(format!(
                "expected at least 8 fields, got {}",
                fields.len()
            )));
        }

        let foundation = match fields[0].split_once(':') {
            Some((_, foundation)) if !foundation.is_empty() => foundation.to_string(),
            _ => return Err(CallError::candidate(format!("bad foundation '{}'", fields[0]))),
        };

        Ok(Self {
            foundation,
            component: number(fields[1], "component")?,
            protocol: fields[2].to_ascii_lowercase(),
            priority: number(fields[3], "priority")?,
            ip: fields[4].to_string(),
            port: number(fields[5], "port")?,
            candidate_type: fields[7].to_string(),
            sdp_mid,
            sdp_mline_index,
        })
    }

    /// Parse the candidate carried by a signaling message.
    pub fn from_message(message: &RtcIceMessage) -> Result<Self> {
        Self::parse(&message.candidate, message.sdp_mid.clone(), message.sdp_mline_index)
    }
}

fn number<T: std::str::FromStr>(raw: &str, field: &str) -> Result<T> {
    raw.parse().map_err(|_| CallError::candidate(format!("bad {field} '{raw}'")))
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.protocol,
            self.priority,
            self.ip,
            self.port,
            self.candidate_type
        )
    }
}
