//! DNS message: header and the four sections

use super::record::{Question, ResourceRecord};
use crate::packet::{BuildFlags, ChecksumState, Packet, PacketBuffer, PacketState};
use bytes::{BufMut, BytesMut};
use std::fmt;
use tracing::debug;
use vproxy_core::{ByteArray, Error, Result};

/// DNS opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Opcode {
    #[default]
    Query,
    IQuery,
    Status,
    Notify,
    Update,
    Other(u8),
}

impl Opcode {
    pub fn from_u8(val: u8) -> Self {
        match val & 0x0F {
            0 => Self::Query,
            1 => Self::IQuery,
            2 => Self::Status,
            4 => Self::Notify,
            5 => Self::Update,
            n => Self::Other(n),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Query => 0,
            Self::IQuery => 1,
            Self::Status => 2,
            Self::Notify => 4,
            Self::Update => 5,
            Self::Other(n) => n & 0x0F,
        }
    }
}

/// DNS response codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rcode {
    #[default]
    NoError,
    FormErr,
    ServFail,
    NXDomain,
    NotImp,
    Refused,
    Other(u8),
}

impl Rcode {
    pub fn from_u8(val: u8) -> Self {
        match val & 0x0F {
            0 => Self::NoError,
            1 => Self::FormErr,
            2 => Self::ServFail,
            3 => Self::NXDomain,
            4 => Self::NotImp,
            5 => Self::Refused,
            n => Self::Other(n),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::NoError => 0,
            Self::FormErr => 1,
            Self::ServFail => 2,
            Self::NXDomain => 3,
            Self::NotImp => 4,
            Self::Refused => 5,
            Self::Other(n) => n & 0x0F,
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => write!(f, "NOERROR"),
            Self::FormErr => write!(f, "FORMERR"),
            Self::ServFail => write!(f, "SERVFAIL"),
            Self::NXDomain => write!(f, "NXDOMAIN"),
            Self::NotImp => write!(f, "NOTIMP"),
            Self::Refused => write!(f, "REFUSED"),
            Self::Other(n) => write!(f, "RCODE({})", n),
        }
    }
}

/// A DNS message
///
/// Section counts are derived from the entry lists when serializing.
#[derive(Debug, Clone, Default)]
pub struct DnsPacket {
    state: PacketState,
    id: u16,
    is_response: bool,
    opcode: Opcode,
    authoritative: bool,
    truncated: bool,
    recursion_desired: bool,
    recursion_available: bool,
    rcode: Rcode,
    questions: Vec<Question>,
    answers: Vec<ResourceRecord>,
    authorities: Vec<ResourceRecord>,
    additionals: Vec<ResourceRecord>,
}

impl DnsPacket {
    /// DNS header size in bytes
    pub const HEADER_SIZE: usize = 12;

    /// A recursive query for one question
    pub fn query(id: u16, question: Question) -> Self {
        DnsPacket {
            id,
            recursion_desired: true,
            questions: vec![question],
            ..Default::default()
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn set_id(&mut self, id: u16) {
        self.invalidate();
        self.id = id;
    }

    pub fn is_response(&self) -> bool {
        self.is_response
    }

    pub fn set_response(&mut self, is_response: bool) {
        self.invalidate();
        self.is_response = is_response;
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.invalidate();
        self.opcode = opcode;
    }

    pub fn authoritative(&self) -> bool {
        self.authoritative
    }

    pub fn set_authoritative(&mut self, authoritative: bool) {
        self.invalidate();
        self.authoritative = authoritative;
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn set_truncated(&mut self, truncated: bool) {
        self.invalidate();
        self.truncated = truncated;
    }

    pub fn recursion_desired(&self) -> bool {
        self.recursion_desired
    }

    pub fn set_recursion_desired(&mut self, recursion_desired: bool) {
        self.invalidate();
        self.recursion_desired = recursion_desired;
    }

    pub fn recursion_available(&self) -> bool {
        self.recursion_available
    }

    pub fn set_recursion_available(&mut self, recursion_available: bool) {
        self.invalidate();
        self.recursion_available = recursion_available;
    }

    pub fn rcode(&self) -> Rcode {
        self.rcode
    }

    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.invalidate();
        self.rcode = rcode;
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn questions_mut(&mut self) -> &mut Vec<Question> {
        self.invalidate();
        &mut self.questions
    }

    pub fn answers(&self) -> &[ResourceRecord] {
        &self.answers
    }

    pub fn answers_mut(&mut self) -> &mut Vec<ResourceRecord> {
        self.invalidate();
        &mut self.answers
    }

    pub fn authorities(&self) -> &[ResourceRecord] {
        &self.authorities
    }

    pub fn authorities_mut(&mut self) -> &mut Vec<ResourceRecord> {
        self.invalidate();
        &mut self.authorities
    }

    pub fn additionals(&self) -> &[ResourceRecord] {
        &self.additionals
    }

    pub fn additionals_mut(&mut self) -> &mut Vec<ResourceRecord> {
        self.invalidate();
        &mut self.additionals
    }

    fn header_flags(&self) -> u16 {
        ((self.is_response as u16) << 15)
            | ((self.opcode.to_u8() as u16) << 11)
            | ((self.authoritative as u16) << 10)
            | ((self.truncated as u16) << 9)
            | ((self.recursion_desired as u16) << 8)
            | ((self.recursion_available as u16) << 7)
            | self.rcode.to_u8() as u16
    }

    fn count(what: &str, len: usize) -> Result<u16> {
        u16::try_from(len)
            .map_err(|_| Error::encode(format!("too many dns {}: {}", what, len)))
    }
}

impl Packet for DnsPacket {
    fn state(&self) -> &PacketState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PacketState {
        &mut self.state
    }

    fn from_buffer(&mut self, buf: PacketBuffer) -> Result<()> {
        // compression pointers are relative to the start of the dns message
        let buf = PacketBuffer::new(buf.into_bytes());
        let message = buf.bytes();
        if message.len() < Self::HEADER_SIZE {
            return Err(Error::invalid_dns(
                "input packet length too short for a dns packet",
            ));
        }

        let id = message.uint16(0)?;
        let flags = message.uint16(2)?;
        let qdcount = message.uint16(4)?;
        let ancount = message.uint16(6)?;
        let nscount = message.uint16(8)?;
        let arcount = message.uint16(10)?;

        let mut cursor = Self::HEADER_SIZE;
        // counts are untrusted, entries are pushed as they decode
        let mut questions = Vec::new();
        for _ in 0..qdcount {
            questions.push(Question::parse(message, &mut cursor)?);
        }
        let mut section = |count: u16| -> Result<Vec<ResourceRecord>> {
            let mut records = Vec::new();
            for _ in 0..count {
                records.push(ResourceRecord::parse(&buf, &mut cursor)?);
            }
            Ok(records)
        };
        let answers = section(ancount)?;
        let authorities = section(nscount)?;
        let additionals = section(arcount)?;

        if cursor < message.len() {
            debug!(
                extra = message.len() - cursor,
                "trailing bytes after dns message ignored"
            );
        }

        *self = DnsPacket {
            state: PacketState::default(),
            id,
            is_response: flags & 0x8000 != 0,
            opcode: Opcode::from_u8((flags >> 11) as u8),
            authoritative: flags & 0x0400 != 0,
            truncated: flags & 0x0200 != 0,
            recursion_desired: flags & 0x0100 != 0,
            recursion_available: flags & 0x0080 != 0,
            rcode: Rcode::from_u8(flags as u8),
            questions,
            answers,
            authorities,
            additionals,
        };
        self.state.set_raw(buf.into_bytes());
        Ok(())
    }

    fn build(&mut self, _flags: BuildFlags) -> Result<ByteArray> {
        let mut buf = BytesMut::with_capacity(512);
        buf.put_u16(self.id);
        buf.put_u16(self.header_flags());
        buf.put_u16(Self::count("questions", self.questions.len())?);
        buf.put_u16(Self::count("answers", self.answers.len())?);
        buf.put_u16(Self::count("authorities", self.authorities.len())?);
        buf.put_u16(Self::count("additionals", self.additionals.len())?);

        for question in &self.questions {
            question.write_to(&mut buf)?;
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            record.write_to(&mut buf)?;
        }

        self.state.set_checksum(ChecksumState::Unset);
        Ok(buf.into())
    }

    fn update_checksum(&mut self) -> Result<()> {
        Ok(())
    }

    fn copy(&self) -> Self {
        DnsPacket {
            state: PacketState::default(),
            ..self.clone()
        }
    }

    fn description(&self) -> String {
        format!(
            "dns,id={},qr={},opcode={},rcode={},questions={},answers={}",
            self.id,
            self.is_response as u8,
            self.opcode.to_u8(),
            self.rcode,
            self.questions.len(),
            self.answers.len()
        )
    }
}

impl PartialEq for DnsPacket {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.header_flags() == other.header_flags()
            && self.questions == other.questions
            && self.answers == other.answers
            && self.authorities == other.authorities
            && self.additionals == other.additionals
    }
}

impl Eq for DnsPacket {}
