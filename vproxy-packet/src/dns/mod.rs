//! DNS message codec (RFC 1035)
//!
//! Names are decoded with compression pointers (§4.1.4) resolved against the
//! whole message and always encoded uncompressed, so a decoded message
//! re-encodes to the same logical content, not necessarily the same bytes.

mod name;
mod packet;
mod rdata;
mod record;

pub use name::{
    format_domain_name, parse_domain_name, MAX_LABEL_LENGTH, MAX_NAME_LENGTH, MAX_POINTER_HOPS,
};
pub use packet::{DnsPacket, Opcode, Rcode};
pub use rdata::RData;
pub use record::{Question, ResourceRecord};

use std::fmt;

/// Record type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    OPT,
    /// Question-only: any type
    ANY,
    Other(u16),
}

impl DnsType {
    pub fn from_u16(val: u16) -> Self {
        match val {
            1 => Self::A,
            2 => Self::NS,
            5 => Self::CNAME,
            6 => Self::SOA,
            12 => Self::PTR,
            15 => Self::MX,
            16 => Self::TXT,
            28 => Self::AAAA,
            33 => Self::SRV,
            41 => Self::OPT,
            255 => Self::ANY,
            n => Self::Other(n),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::A => 1,
            Self::NS => 2,
            Self::CNAME => 5,
            Self::SOA => 6,
            Self::PTR => 12,
            Self::MX => 15,
            Self::TXT => 16,
            Self::AAAA => 28,
            Self::SRV => 33,
            Self::OPT => 41,
            Self::ANY => 255,
            Self::Other(n) => n,
        }
    }
}

impl fmt::Display for DnsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(n) => write!(f, "TYPE{}", n),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Class codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsClass {
    /// the Internet
    IN,
    /// the CHAOS class
    CH,
    /// Hesiod
    HS,
    /// Question-only
    NONE,
    /// Question-only
    ANY,
    /// Records such as OPT reuse the field for other purposes
    Other(u16),
}

impl DnsClass {
    pub fn from_u16(val: u16) -> Self {
        match val {
            1 => Self::IN,
            3 => Self::CH,
            4 => Self::HS,
            254 => Self::NONE,
            255 => Self::ANY,
            n => Self::Other(n),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::IN => 1,
            Self::CH => 3,
            Self::HS => 4,
            Self::NONE => 254,
            Self::ANY => 255,
            Self::Other(n) => n,
        }
    }

    /// Only meaningful in the question section
    pub fn is_question_only(self) -> bool {
        matches!(self, Self::NONE | Self::ANY)
    }
}

impl fmt::Display for DnsClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(n) => write!(f, "CLASS{}", n),
            other => write!(f, "{:?}", other),
        }
    }
}
